//! `blackroad journal` — inspect and verify the memory journal.

use blackroad_config::GatewayConfig;
use blackroad_memory::{verify_journal, MemoryJournal};

pub fn verify() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::load()?;
    let path = config.journal_path();

    match verify_journal(&path) {
        Ok(count) => {
            println!("Journal chain OK: {count} entries verified");
            Ok(())
        }
        Err(e) => {
            eprintln!("Journal chain BROKEN: {e}");
            Err(e.into())
        }
    }
}

pub fn recent(limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::load()?;
    let journal = MemoryJournal::open(config.journal_path())?;

    let entries = journal.recent(limit)?;
    if entries.is_empty() {
        println!("Journal is empty");
        return Ok(());
    }
    for entry in entries {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}
