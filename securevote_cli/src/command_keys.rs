use crate::context::Context;
use crate::{expand, fail};
use securevote::ElectionId;

pub fn command_keys(matches: &clap::ArgMatches) {
    let election_id = ElectionId::new(expand(matches.value_of("ELECTION-ID").unwrap_or_default()));

    let ctx = Context::load();
    let keys = ctx
        .keys
        .published_keys(&election_id)
        .unwrap_or_else(|e| fail("keys", e));

    let keys = serde_json::to_string_pretty(&keys).unwrap_or_else(|e| fail("keys", e));
    println!("{}", keys);
}
