use std::path::Path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use shard_sort::{compare_files, distributed_sort, FileDiff, FileSorterBuilder, WorkerClient, WorkerServer};

fn main() {
    let args = build_arg_parser();

    let (name, sub_args) = args.subcommand().expect("subcommand is required");

    let log_level: LogLevel = sub_args.value_of_t_or_exit("log_level");
    init_logger(log_level);

    match name {
        "local" => run_local(sub_args),
        "worker" => run_worker(sub_args),
        "dist" => run_dist(sub_args),
        _ => unreachable!(),
    }
}

fn run_local(args: &clap::ArgMatches) {
    let input = args.value_of("input").expect("value is required");
    let output = args.value_of("output").expect("value is required");
    let expected = args.value_of("expected").expect("value is required");
    let chunk_size = parse_chunk_size(args);

    let mut sorter_builder = FileSorterBuilder::new();
    if args.is_present("threads") {
        sorter_builder = sorter_builder.with_threads_number(args.value_of_t_or_exit("threads"));
    }
    if let Some(tmp_dir) = args.value_of("tmp_dir") {
        sorter_builder = sorter_builder.with_tmp_dir(Path::new(tmp_dir));
    }

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = sorter.sort_file(Path::new(input), Path::new(output), chunk_size) {
        log::error!("sorting error: {}", err);
        process::exit(1);
    }

    check_output(Path::new(expected), Path::new(output));
}

fn run_worker(args: &clap::ArgMatches) {
    let port: u16 = args.value_of_t_or_exit("port");
    let base_dir = args.value_of("dir").unwrap_or(".");

    let server = match WorkerServer::bind(("0.0.0.0", port), Path::new(base_dir)) {
        Ok(server) => server,
        Err(err) => {
            log::error!("worker startup error: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = server.run() {
        log::error!("worker error: {}", err);
        process::exit(1);
    }
}

fn run_dist(args: &clap::ArgMatches) {
    let input = args.value_of("input").expect("value is required");
    let output = args.value_of("output").expect("value is required");
    let expected = args.value_of("expected").expect("value is required");
    let chunk_size = parse_chunk_size(args);

    let mut nodes = Vec::new();
    for addr in args.values_of("node").expect("value is required") {
        let (host, port) = match parse_node_addr(addr) {
            Ok(parts) => parts,
            Err(err) => {
                log::error!("invalid node address {:?}: {}", addr, err);
                process::exit(1);
            }
        };

        match WorkerClient::connect(host, port) {
            Ok(client) => nodes.push(client),
            Err(err) => {
                log::error!("worker connection error ({}): {}", addr, err);
                process::exit(1);
            }
        }
    }

    if let Err(err) = distributed_sort(input, output, chunk_size, &mut nodes) {
        log::error!("distributed sorting error: {}", err);
        process::exit(1);
    }

    for node in &mut nodes {
        node.close();
    }

    check_output(Path::new(expected), Path::new(output));
}

fn check_output(expected: &Path, actual: &Path) {
    match compare_files(expected, actual) {
        Ok(FileDiff::Equal) => log::info!("output matches the expected file"),
        Ok(diff) => {
            log::error!("output verification failed: {}", diff);
            process::exit(1);
        }
        Err(err) => {
            log::error!("output verification error: {}", err);
            process::exit(1);
        }
    }
}

fn parse_chunk_size(args: &clap::ArgMatches) -> u64 {
    let chunk_size = args.value_of("chunk_size").expect("value is required");
    chunk_size.parse::<ByteSize>().expect("value is pre-validated").as_u64()
}

fn parse_node_addr(addr: &str) -> Result<(&str, u16), String> {
    let (host, port) = addr.rsplit_once(':').ok_or("expected host:port")?;
    let port = port.parse().map_err(|err| format!("invalid port: {}", err))?;

    Ok((host, port))
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn input_arg() -> clap::Arg<'static> {
    clap::Arg::new("input")
        .short('i')
        .long("input")
        .help("file to be sorted")
        .required(true)
        .takes_value(true)
}

fn output_arg() -> clap::Arg<'static> {
    clap::Arg::new("output")
        .short('o')
        .long("output")
        .help("result file")
        .required(true)
        .takes_value(true)
}

fn expected_arg() -> clap::Arg<'static> {
    clap::Arg::new("expected")
        .short('e')
        .long("expected")
        .help("file holding the expected sorted records")
        .required(true)
        .takes_value(true)
}

fn chunk_size_arg() -> clap::Arg<'static> {
    clap::Arg::new("chunk_size")
        .short('c')
        .long("chunk-size")
        .help("chunk size")
        .required(true)
        .takes_value(true)
        .validator(|v| match v.parse::<ByteSize>() {
            Ok(_) => Ok(()),
            Err(err) => Err(format!("Chunk size format incorrect: {}", err)),
        })
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("shard-sort")
        .about("distributed external sorter")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values())
                .global(true),
        )
        .subcommand(
            clap::App::new("local")
                .about("sort a local file and verify the result")
                .arg(input_arg())
                .arg(output_arg())
                .arg(chunk_size_arg())
                .arg(expected_arg())
                .arg(
                    clap::Arg::new("threads")
                        .short('t')
                        .long("threads")
                        .help("number of threads to use for parallel sorting")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("tmp_dir")
                        .short('d')
                        .long("tmp-dir")
                        .help("directory to be used to store temporary data")
                        .takes_value(true),
                ),
        )
        .subcommand(
            clap::App::new("worker")
                .about("serve one collecting client on this node")
                .arg(
                    clap::Arg::new("port")
                        .short('p')
                        .long("port")
                        .help("port to listen on")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("dir")
                        .long("dir")
                        .help("directory file names in commands are resolved against")
                        .takes_value(true),
                ),
        )
        .subcommand(
            clap::App::new("dist")
                .about("sort a file sharded across worker nodes and verify the result")
                .arg(input_arg())
                .arg(output_arg())
                .arg(chunk_size_arg())
                .arg(expected_arg())
                .arg(
                    clap::Arg::new("node")
                        .short('n')
                        .long("node")
                        .help("worker address as host:port, repeat for each node")
                        .required(true)
                        .takes_value(true)
                        .multiple_occurrences(true),
                ),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
