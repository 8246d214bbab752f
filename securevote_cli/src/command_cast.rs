use crate::context::Context;
use crate::{expand, fail};
use securevote::{BallotBox, ElectionId, VoterSession};

pub fn command_cast(matches: &clap::ArgMatches) {
    let election_id = ElectionId::new(expand(matches.value_of("ELECTION-ID").unwrap_or_default()));
    let voter = expand(matches.value_of("VOTER").unwrap_or_default());
    let candidate = expand(matches.value_of("CANDIDATE").unwrap_or_default());

    let ctx = Context::load();
    let ballot_box = BallotBox::new(ctx.keys.clone(), ctx.registry.clone(), ctx.ledger());

    // The operator running this command acts as the identity provider
    let session = VoterSession::authenticated(voter, election_id);
    let receipt = match ballot_box.cast(session, &candidate) {
        Ok(receipt) => receipt,
        Err(e) if e.is_retryable() => fail("cast", format!("{} (try again)", e)),
        Err(e) => fail("cast", e),
    };

    let receipt = serde_json::to_string_pretty(&receipt).unwrap_or_else(|e| fail("cast", e));
    println!("{}", receipt);
}
