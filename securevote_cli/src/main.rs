use clap::{App, AppSettings, Arg, SubCommand};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

mod command_audit;
mod command_candidates;
mod command_cast;
mod command_keygen;
mod command_keys;
mod command_records;
mod command_tally;
mod command_verify;
mod context;

use command_audit::command_audit;
use command_candidates::command_candidates;
use command_cast::command_cast;
use command_keygen::command_keygen;
use command_keys::command_keys;
use command_records::command_records;
use command_tally::command_tally;
use command_verify::command_verify;

fn main() {
    let election_arg = Arg::with_name("ELECTION-ID")
        .index(1)
        .required(true)
        .help("Election identifier");

    let matches = App::new("SecureVote CLI")
        .version("0.1")
        .about("Casts and tallies anonymous ballots for a single tally authority")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Sets the level of verbosity"),
        )
        .arg(
            Arg::with_name("actor")
                .long("actor")
                .takes_value(true)
                .global(true)
                .help("Name recorded in the audit log for administrative actions"),
        )
        .subcommand(SubCommand::with_name("keygen").about("Generate a master key for SECUREVOTE_MASTER_KEY"))
        .subcommand(
            SubCommand::with_name("cast")
                .about("Cast a ballot for an authenticated voter")
                .arg(election_arg.clone())
                .arg(
                    Arg::with_name("VOTER")
                        .index(2)
                        .required(true)
                        .help("Voter identity as vouched for by the identity provider"),
                )
                .arg(
                    Arg::with_name("CANDIDATE")
                        .index(3)
                        .required(true)
                        .help("Candidate id"),
                ),
        )
        .subcommand(
            SubCommand::with_name("tally")
                .about("Tally an election")
                .arg(election_arg.clone())
                .arg(
                    Arg::with_name("print-results")
                        .long("print-results")
                        .help("Print the winners"),
                )
                .arg(
                    Arg::with_name("declare")
                        .long("declare")
                        .help("Declare the results in the audit log"),
                ),
        )
        .subcommand(
            SubCommand::with_name("verify")
                .about("Check that a receipt's record is stored and verifies, without revealing the vote")
                .arg(election_arg.clone())
                .arg(
                    Arg::with_name("RECORD-ID")
                        .index(2)
                        .required(true)
                        .help("Record id from the cast receipt"),
                ),
        )
        .subcommand(
            SubCommand::with_name("candidates")
                .about("Print the published candidates of an election")
                .arg(election_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("records")
                .about("List the sealed records stored for an election")
                .arg(election_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("keys")
                .about("Print the published signing keys of an election")
                .arg(election_arg),
        )
        .subcommand(
            SubCommand::with_name("audit")
                .about("Print the audit log, newest first")
                .arg(
                    Arg::with_name("verify")
                        .long("verify")
                        .help("Verify the hash chain"),
                ),
        )
        .get_matches();

    let level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    init_logging(level);

    let actor = matches.value_of("actor").unwrap_or("operator").to_owned();

    // Subcommands
    match matches.subcommand() {
        ("keygen", Some(matches)) => command_keygen(matches),
        ("cast", Some(matches)) => command_cast(matches),
        ("tally", Some(matches)) => command_tally(matches, &actor),
        ("verify", Some(matches)) => command_verify(matches),
        ("candidates", Some(matches)) => command_candidates(matches),
        ("records", Some(matches)) => command_records(matches),
        ("keys", Some(matches)) => command_keys(matches),
        ("audit", Some(matches)) => command_audit(matches),
        _ => {}
    }
}

fn init_logging(level: LevelFilter) {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%dT%H:%M:%S%.3f)} {h({l})} {m}{n}")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level));

    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("securevote: unable to initialise logging: {}", e);
            }
        }
        Err(e) => eprintln!("securevote: invalid logging configuration: {}", e),
    }
}

/// Expand `~` and environment variables in a user supplied argument.
pub fn expand(input: &str) -> String {
    match shellexpand::full(input) {
        Ok(expanded) => expanded.into_owned(),
        Err(e) => {
            eprintln!("securevote: unable to expand {}: {}", input, e);
            std::process::exit(1);
        }
    }
}

/// Print an error and exit.
pub fn fail<E: std::fmt::Display>(context: &str, e: E) -> ! {
    eprintln!("securevote {}: {}", context, e);
    std::process::exit(1);
}
