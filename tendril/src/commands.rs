use crate::CLAP_STYLING;
use clap::{arg, command};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "tendril.toml";
const DEFAULT_DB: &str = "~/.local/share/tendril/graph.db";

fn config_arg() -> clap::Arg {
    arg!(-c --"config" <PATH>)
        .required(false)
        .help("Path to the tendril configuration file")
        .value_parser(clap::value_parser!(PathBuf))
        .default_value(DEFAULT_CONFIG)
}

fn db_arg() -> clap::Arg {
    arg!(--"db" <PATH>)
        .required(false)
        .help("Location of the graph database")
        .default_value(DEFAULT_DB)
}

fn label_arg() -> clap::Arg {
    arg!(-l --"label" <LABEL>)
        .required(false)
        .help("Node label")
        .default_value("Person")
}

fn relationship_arg() -> clap::Arg {
    arg!(-r --"relationship" <TYPE>)
        .required(false)
        .help("Relationship type")
        .default_value("FRIENDS_WITH")
}

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("tendril")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("tendril")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner and non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-v --"verbose" ... "Increase log verbosity (-v info, -vv debug)")
                .required(false)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("crawl")
                .about(
                    "Expand the friends-of-friends graph around the configured seeds, write the \
                snapshot and load it into the graph store.",
                )
                .arg(config_arg())
                .arg(
                    arg!(-s --"seeds-file" <PATH>)
                        .required(false)
                        .help("Newline-delimited file of seeds, replacing crawl.seeds")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(-d --"depth" <DEPTH>)
                        .required(false)
                        .help("Override crawl.max_depth")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Override output.csv_file"),
                )
                .arg(
                    arg!(--"no-load")
                        .required(false)
                        .help("Only write the snapshot; leave the graph store untouched")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"report" <PATH>)
                        .required(false)
                        .help("Save the crawl report to a file")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            command!("resolve")
                .about("Resolve screen names to numeric identities")
                .arg(config_arg())
                .arg(
                    arg!(<NAMES> ...)
                        .required(true)
                        .help("Screen names or numeric ids"),
                ),
        )
        .subcommand(
            command!("load")
                .about("Merge a root,friend snapshot file into the graph store")
                .arg(
                    arg!(-i --"input" <PATH>)
                        .required(true)
                        .help("Snapshot file to load")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(db_arg())
                .arg(label_arg())
                .arg(relationship_arg())
                .arg(
                    arg!(--"reset")
                        .required(false)
                        .help("Delete every node of the label before loading")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("reset")
                .about("Delete every node of a label together with its edges")
                .arg(db_arg())
                .arg(label_arg()),
        )
        .subcommand(
            command!("stats")
                .about("Show node and edge counts and recent crawl sessions")
                .arg(db_arg())
                .arg(label_arg())
                .arg(relationship_arg())
                .arg(
                    arg!(-n --"sessions" <COUNT>)
                        .required(false)
                        .help("Number of recent sessions to list")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("5"),
                ),
        )
}
