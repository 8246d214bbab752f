use crate::context::Context;
use crate::{expand, fail};
use securevote::{ElectionId, RecordId, RecordStatus};

pub fn command_verify(matches: &clap::ArgMatches) {
    let election_id = ElectionId::new(expand(matches.value_of("ELECTION-ID").unwrap_or_default()));
    let record_id = expand(matches.value_of("RECORD-ID").unwrap_or_default());
    let record_id = RecordId::parse_str(&record_id).unwrap_or_else(|e| fail("verify", e));

    let ctx = Context::load();
    let status = ctx
        .admin()
        .verify_record(&election_id, &record_id)
        .unwrap_or_else(|e| fail("verify", e));

    match &status {
        RecordStatus::Valid => println!("Record {} is stored and verifies", record_id),
        RecordStatus::Missing => println!("Record {} is not in the ledger", record_id),
        RecordStatus::Rejected(reason) => println!("Record {} is rejected: {}", record_id, reason),
    }
    if status != RecordStatus::Valid {
        std::process::exit(2);
    }
}
