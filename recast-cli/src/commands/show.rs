use clap::Args;
use serde_json::json;

use super::{Format, Globals};

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Refactoring name (case, spaces and underscores are ignored)
    pub recipe: String,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: Format,
}

pub fn run(args: &ShowArgs, globals: &Globals) -> anyhow::Result<()> {
    let registry = super::registry(globals)?;
    let descriptor = registry.lookup(&args.recipe)?;
    let entry = &descriptor.entry;

    if args.format == Format::Json {
        let shown = json!({
            "name": entry.name,
            "title": entry.title,
            "category": entry.category,
            "summary": entry.summary,
            "target": entry.target,
            "shape": descriptor.shape,
            "steps": descriptor.step_names(),
            "prerequisites": entry.prerequisites,
        });
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }

    println!("{} ({})", entry.title, entry.name);
    println!();
    println!("  {}", entry.summary);
    println!();
    println!("  Category: {}", entry.category);
    println!("  Shape:    {}", descriptor.shape.describe());
    println!("  Target:   {}", entry.target);
    if !entry.prerequisites.is_empty() {
        println!("  Often preceded by: {}", entry.prerequisites.join(", "));
    }
    println!();
    println!("  Steps:");
    for (i, step) in descriptor.step_names().iter().enumerate() {
        println!("    {}. {step}", i + 1);
    }
    Ok(())
}
