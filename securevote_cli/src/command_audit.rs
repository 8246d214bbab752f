use crate::context::Context;
use crate::fail;
use securevote::{verify_chain, AuditLog};

pub fn command_audit(matches: &clap::ArgMatches) {
    let ctx = Context::load();
    let mut entries = ctx.audit().entries().unwrap_or_else(|e| fail("audit", e));

    if matches.is_present("verify") {
        verify_chain(&entries).unwrap_or_else(|e| fail("audit", e));
        println!("Audit chain of {} entries verified", entries.len());
    }

    entries.reverse();
    for entry in entries {
        let reference = entry.reference_id.as_deref().unwrap_or("-");
        println!(
            "{} {} {} {}",
            entry.timestamp.to_rfc3339(),
            entry.actor,
            entry.action,
            reference
        );
    }
}
