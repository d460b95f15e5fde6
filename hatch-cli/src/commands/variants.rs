//! Variant inspection commands: `variants`, `plan` and `dockerfile`.

use super::resolve_variant;
use crate::VariantArgs;
use anyhow::Result;
use colored::Colorize;
use hatch_core::{plan as plan_steps, render_dockerfile, Config};
use tabled::{Table, Tabled};

/// Lists the configured variants.
pub fn variants(config: &Config) -> Result<()> {
    let table = config.variant_table()?;

    #[derive(Tabled)]
    struct VariantRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "DB CLIENT")]
        database_client: String,
        #[tabled(rename = "BASE IMAGE")]
        base_image: String,
        #[tabled(rename = "SYSTEM PACKAGES")]
        packages: String,
        #[tabled(rename = "EXTRAS")]
        extras: String,
    }

    let rows: Vec<VariantRow> = table
        .entries()
        .iter()
        .map(|entry| VariantRow {
            name: entry.spec.name.clone(),
            database_client: if entry.database_client { "yes" } else { "no" }.to_string(),
            base_image: entry.spec.base_image_ref.clone(),
            packages: join_or_dash(entry.spec.system_packages.iter().map(String::as_str)),
            extras: join_or_dash(entry.spec.extra_pip_packages.iter().map(String::as_str)),
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}

/// Prints the ordered build steps of the selected variant.
pub fn plan(config: &Config, args: &VariantArgs) -> Result<()> {
    let spec = resolve_variant(config, args)?;
    let steps = plan_steps(&spec);

    println!("{} {}", "Variant".bold(), spec.name.green());
    for (i, step) in steps.iter().enumerate() {
        println!("  {} {:<24} {}", format!("[{}]", i).blue(), step.kind().to_string().yellow(), step);
    }
    Ok(())
}

/// Prints the Dockerfile equivalent of the selected variant's build.
pub fn dockerfile(config: &Config, args: &VariantArgs) -> Result<()> {
    let spec = resolve_variant(config, args)?;
    print!("{}", render_dockerfile(&plan_steps(&spec)));
    Ok(())
}

fn join_or_dash<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let joined = items.collect::<Vec<_>>().join(" ");
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_or_dash() {
        assert_eq!(join_or_dash(["gcc", "libpq-dev"].into_iter()), "gcc libpq-dev");
        assert_eq!(join_or_dash(std::iter::empty()), "-");
    }
}
