use refgate_core::RefereeDescriptor;
use serde::Serialize;

use super::{Settings, fail};

#[derive(Serialize)]
struct Listing<'a> {
    #[serde(flatten)]
    descriptor: &'a RefereeDescriptor,
    phase: refgate_core::Phase,
}

pub fn run(settings: &Settings, json: bool) {
    let registry = settings.registry().unwrap_or_else(|e| fail(e));
    let mut descriptors: Vec<_> = registry.descriptors().collect();
    descriptors.sort_by_key(|d| d.category.phase());

    if json {
        let listing: Vec<Listing<'_>> = descriptors
            .iter()
            .map(|d| Listing {
                descriptor: d,
                phase: d.category.phase(),
            })
            .collect();
        match serde_json::to_string_pretty(&listing) {
            Ok(text) => println!("{text}"),
            Err(e) => fail(e),
        }
        return;
    }

    println!(
        "{:<26} {:<11} {:<10} {:>4} {:>8}  Aliases",
        "Referee", "Phase", "Label", "Cost", "Timeout"
    );
    println!("{}", "-".repeat(90));
    for d in &descriptors {
        println!(
            "{:<26} {:<11} {:<10} {:>4} {:>7}s  {}",
            d.name,
            d.category.phase().to_string(),
            d.short_name,
            d.cost,
            d.timeout.as_secs(),
            d.aliases.join(", ")
        );
        if !d.description.is_empty() {
            println!("    {}", d.description);
        }
    }
    println!("\n{} referee(s) registered", descriptors.len());
}
