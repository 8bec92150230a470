use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    chatdesk::cli::main()
}
