//! Model listing
//!
//! Prints the built-in catalog and the configured custom models, grouped by
//! provider, with list prices where they are known.

use std::error::Error;

use crate::core::catalog::{builtin_cost_table, ModelCatalog};
use crate::core::config::Settings;

pub fn list_models() -> Result<(), Box<dyn Error>> {
    let settings = Settings::load()?;
    let catalog = ModelCatalog::new(settings.custom_model_list());
    let prices = builtin_cost_table(&settings.pricing);

    println!("🤖 Available Models");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if let Some(default_model) = settings.default_model.as_deref() {
        println!();
        println!("🎯 Default model: {default_model} (from config)");
    }

    for (group, models) in catalog.all_models() {
        println!();
        println!("{group}");
        for model in models {
            let marker = if settings.default_model.as_deref() == Some(model.as_str()) {
                "*"
            } else {
                " "
            };
            println!(" {marker} {model}");
            println!("     {}", prices.display(&model));
        }
    }

    println!();
    println!("💡 Any other model name is routed by prefix, e.g. openrouter/<model> or ollama/<model>.");
    Ok(())
}
