use crate::context::Context;
use crate::{expand, fail};
use securevote::ElectionId;

pub fn command_records(matches: &clap::ArgMatches) {
    let election_id = ElectionId::new(expand(matches.value_of("ELECTION-ID").unwrap_or_default()));

    let ctx = Context::load();
    let records = ctx
        .admin()
        .stored_records(&election_id)
        .unwrap_or_else(|e| fail("records", e));

    for record in &records {
        println!(
            "{} {} {}",
            record.id,
            record.signer_key_id,
            record.timestamp.to_rfc3339()
        );
    }
    println!("{} records", records.len());
}
