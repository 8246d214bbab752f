use crate::context::Context;
use crate::{expand, fail};
use log::warn;
use securevote::ElectionId;

pub fn command_tally(matches: &clap::ArgMatches, actor: &str) {
    let election_id = ElectionId::new(expand(matches.value_of("ELECTION-ID").unwrap_or_default()));

    let ctx = Context::load();
    let admin = ctx.admin();

    let tallied = admin
        .trigger_tally(actor, &election_id)
        .unwrap_or_else(|e| fail("tally", e));
    if let Some(e) = &tallied.audit_error {
        warn!("{}", e);
    }

    let result = serde_json::to_string_pretty(&tallied.result).unwrap_or_else(|e| fail("tally", e));
    println!("{}", result);

    if matches.is_present("declare") {
        let declaration = admin
            .declare_results(actor, &election_id)
            .unwrap_or_else(|e| fail("tally", e));
        if let Some(e) = &declaration.audit_error {
            warn!("{}", e);
        }
    }

    if matches.is_present("print-results") {
        println!("Results:");
        for (candidate, count) in &tallied.result.counts {
            println!("  {} got {} votes", candidate, count);
        }
        println!("  {} rejected records", tallied.result.total_rejected);

        let winners = tallied.result.winners();
        match winners.len() {
            0 => println!("  No votes were counted"),
            1 => println!("  The winner is {}", winners[0]),
            _ => println!("  Tied for first: {}", winners.join(", ")),
        }
    }
}
