use crate::context::Context;
use crate::{expand, fail};
use securevote::{CandidateRegistry, ElectionId};

pub fn command_candidates(matches: &clap::ArgMatches) {
    let election_id = ElectionId::new(expand(matches.value_of("ELECTION-ID").unwrap_or_default()));

    let ctx = Context::load();
    let candidates = ctx
        .registry
        .candidates(&election_id)
        .unwrap_or_else(|| fail("candidates", format!("unknown election {}", election_id)));

    let candidates = serde_json::to_string_pretty(&candidates).unwrap_or_else(|e| fail("candidates", e));
    println!("{}", candidates);
}
