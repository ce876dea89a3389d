//! rules_check - validate a rule file or database before deploying it
//!
//! Loads the records, compiles them, and reports which rules would be
//! served and which would be skipped.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use classroom_sentinel::rules::{
    compile_rules, default_rules, ruleset_fingerprint, FileRuleSource, RuleSource,
    SqliteRuleSource, StaticRuleSource,
};

#[derive(Parser, Debug)]
#[command(name = "rules_check", about = "Compile behavior rules and print a summary")]
struct Args {
    /// JSON or TOML rule file.
    #[arg(long, value_name = "PATH", conflicts_with = "db")]
    file: Option<PathBuf>,
    /// SQLite database with a behavior_rules table.
    #[arg(long, value_name = "PATH", conflicts_with = "file")]
    db: Option<String>,
    /// Exit non-zero if any rule is skipped.
    #[arg(long)]
    strict: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let source: Box<dyn RuleSource> = match (&args.file, &args.db) {
        (Some(path), _) => Box::new(FileRuleSource::new(path.clone())),
        (None, Some(db)) => Box::new(SqliteRuleSource::open(db)?),
        (None, None) => Box::new(StaticRuleSource::new(default_rules())),
    };
    let records = source.load_rules()?;
    let rules = compile_rules(&records);

    for rule in &rules {
        println!(
            "{:>4}  {:<11} level {}  {:<8} {:<24} {}",
            rule.id,
            rule.rule_type().as_str(),
            rule.alert_level.as_u8(),
            if rule.active { "active" } else { "inactive" },
            rule.kind.behavior_label(),
            rule.name
        );
    }
    let skipped = records
        .iter()
        .filter(|r| !rules.iter().any(|rule| rule.id == r.id))
        .count();
    println!(
        "{} source: {} records, {} compiled, {} skipped",
        source.name(),
        records.len(),
        rules.len(),
        skipped
    );
    println!("fingerprint: {}", hex::encode(ruleset_fingerprint(&rules)));

    if args.strict && skipped > 0 {
        return Err(anyhow!("{} rule(s) skipped", skipped));
    }
    Ok(())
}
