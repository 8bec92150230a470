//! `auth` and `deauth` commands: API keys in the system keyring

use std::error::Error;
use std::io::{self, BufRead, Write};

use crate::core::catalog::{BuiltinProvider, ModelCatalog};
use crate::core::keyring::ApiKeys;

fn find_provider<'a>(
    catalog: &'a ModelCatalog,
    provider_id: &str,
) -> Result<&'a BuiltinProvider, Box<dyn Error>> {
    catalog.find_provider(provider_id).ok_or_else(|| {
        let known: Vec<&str> = catalog
            .providers()
            .iter()
            .map(|provider| provider.id.as_str())
            .collect();
        format!(
            "Unknown provider '{provider_id}'. Known providers: {}",
            known.join(", ")
        )
        .into()
    })
}

pub fn run_auth(provider_id: &str) -> Result<(), Box<dyn Error>> {
    let catalog = ModelCatalog::default();
    let provider = find_provider(&catalog, provider_id)?;

    println!("🔐 chatdesk Authentication");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("Selected provider: {}", provider.display_name);
    print!("Enter your API key: ");
    io::stdout().flush()?;

    let mut key = String::new();
    io::stdin().lock().read_line(&mut key)?;
    let key = key.trim();
    if key.is_empty() {
        return Err("API key cannot be empty".into());
    }

    ApiKeys::new().store(&provider.id, key)?;
    println!("✅ Stored API key for {}", provider.display_name);
    Ok(())
}

pub fn run_deauth(provider_id: &str) -> Result<(), Box<dyn Error>> {
    let catalog = ModelCatalog::default();
    let provider = find_provider(&catalog, provider_id)?;
    ApiKeys::new().remove(&provider.id)?;
    println!("✅ Removed API key for {}", provider.display_name);
    Ok(())
}
