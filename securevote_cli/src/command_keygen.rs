pub fn command_keygen(_matches: &clap::ArgMatches) {
    let master_key = hex::encode(securevote::generate_master_key());

    println!("SECUREVOTE_MASTER_KEY={}", master_key);
}
