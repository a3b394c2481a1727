use anyhow::Context;
use clap::Args;

use recast_core::{Category, RefactoringDescriptor};

use super::{Format, Globals};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only list refactorings of this category (e.g. `generalization`)
    #[arg(long)]
    pub category: Option<String>,

    /// Only list refactorings whose name matches this glob (e.g. `*Temp*`)
    #[arg(long)]
    pub filter: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: Format,
}

pub fn run(args: &ListArgs, globals: &Globals) -> anyhow::Result<()> {
    let registry = super::registry(globals)?;

    let category: Option<Category> = args
        .category
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let mut selected: Vec<&RefactoringDescriptor> = match &args.filter {
        Some(pattern) => registry
            .matching(pattern)
            .with_context(|| format!("Bad filter pattern: {pattern}"))?
            .into_iter()
            .map(|d| &**d)
            .collect(),
        None => registry.iter().map(|d| &**d).collect(),
    };
    if let Some(category) = category {
        selected.retain(|d| d.category() == category);
    }
    selected.sort_by(|a, b| a.category().cmp(&b.category()).then(a.name().cmp(b.name())));

    match args.format {
        Format::Json => {
            let entries: Vec<_> = selected.iter().map(|d| &d.entry).collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Format::Text => print_text(&selected),
    }
    Ok(())
}

fn print_text(selected: &[&RefactoringDescriptor]) {
    if selected.is_empty() {
        println!("No refactorings match.");
        return;
    }
    let width = selected.iter().map(|d| d.name().len()).max().unwrap_or(0);
    let mut current = None;
    for descriptor in selected {
        if current != Some(descriptor.category()) {
            if current.is_some() {
                println!();
            }
            current = Some(descriptor.category());
            println!("{}:", descriptor.category());
        }
        println!(
            "  {:<width$}  {}",
            descriptor.name(),
            descriptor.entry.summary
        );
    }
    println!();
    println!("{} refactorings", selected.len());
}
