use clap::{App, Arg};
use dsfmq_server::fmq::FileQueueFactory;
use dsfmq_server::server::{FmqServer, ServerConfig, DEFAULT_MAX_CLIENTS, DEFAULT_PORT};
use dsfmq_server::session::{
    ReadLimits, SessionOptions, DEFAULT_MAX_BUF_SIZE, DEFAULT_MAX_BYTES, DEFAULT_MAX_MESSAGES,
    DEFAULT_MAX_SLOTS,
};
use log::{error, info};
use simple_logging;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

const DATA_DIR_ENV: &str = "RAP_DATA_DIR";

///
/// This holds the command line options:
///
#[derive(Debug, Clone)]
struct ProgramOptions {
    port: u16,
    instance: String,
    max_clients: usize,
    max_quiescent_secs: u64,
    debug: bool,
    verbose: bool,
    no_threads: bool,
    data_dir: PathBuf,
    log_filename: Option<String>,
    max_read_msgs: usize,
    max_read_bytes: usize,
    max_slots: i32,
    max_buf_size: i32,
}

fn main() {
    let options = process_options();
    let level = if options.verbose {
        log::LevelFilter::Trace
    } else if options.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let logging = match &options.log_filename {
        Some(file) => simple_logging::log_to_file(file, level),
        None => {
            simple_logging::log_to_stderr(level);
            Ok(())
        }
    };
    if let Err(e) = logging {
        eprintln!("Unable to set up logging: {}", e);
        process::exit(-1);
    }
    info!(
        "DsFmqServer starting as {} with data directory {}",
        whoami::username(),
        options.data_dir.display()
    );

    let mut config = ServerConfig {
        port: options.port,
        instance: options.instance.clone(),
        max_clients: options.max_clients,
        max_quiescent_secs: options.max_quiescent_secs,
        no_threads: options.no_threads,
        session: SessionOptions {
            data_dir: options.data_dir.clone(),
            read_limits: ReadLimits {
                max_messages: options.max_read_msgs,
                max_bytes: options.max_read_bytes,
            },
            max_slots: options.max_slots,
            max_buf_size: options.max_buf_size,
            ..SessionOptions::default()
        },
        ..ServerConfig::default()
    };
    if let Err(e) = config.apply_environment() {
        error!("{}", e);
        eprintln!("{}", e);
        process::exit(-1);
    }

    let mut server = match FmqServer::bind(config, Arc::new(FileQueueFactory)) {
        Ok(server) => server,
        Err(e) => {
            error!("Unable to start: {}", e);
            eprintln!("Unable to start: {}", e);
            process::exit(-1);
        }
    };
    if let Err(e) = server.run() {
        error!("Server failed: {}", e);
        process::exit(-1);
    }
    info!("DsFmqServer exiting");
}
///
/// Argument processing.  We do this with clap.  The options are
/// described in the crate documentation.  Any value that does not
/// parse is reported and we exit.
///
fn process_options() -> ProgramOptions {
    let default_port = DEFAULT_PORT.to_string();
    let default_cmax = DEFAULT_MAX_CLIENTS.to_string();
    let default_msgs = DEFAULT_MAX_MESSAGES.to_string();
    let default_bytes = DEFAULT_MAX_BYTES.to_string();
    let default_slots = DEFAULT_MAX_SLOTS.to_string();
    let default_buf_size = DEFAULT_MAX_BUF_SIZE.to_string();

    let parser = App::new("DsFmqServer")
        .version("1.0")
        .about("Serves File Message Queues to network clients")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORTNUM")
                .help("Port on which to listen for clients")
                .takes_value(true)
                .default_value(&default_port),
        )
        .arg(
            Arg::with_name("instance")
                .short("i")
                .long("instance")
                .value_name("NAME")
                .help("Instance name reported to status queries")
                .takes_value(true)
                .default_value("primary"),
        )
        .arg(
            Arg::with_name("cmax")
                .long("cmax")
                .value_name("N")
                .help("Maximum number of simultaneous clients")
                .takes_value(true)
                .default_value(&default_cmax),
        )
        .arg(
            Arg::with_name("qmax")
                .long("qmax")
                .value_name("SECS")
                .help("Exit after this many idle seconds with no clients, 0 means never")
                .takes_value(true)
                .default_value("0"),
        )
        .arg(
            Arg::with_name("debug")
                .short("d")
                .long("debug")
                .help("Debug logging"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Verbose (trace) logging, implies --debug"),
        )
        .arg(
            Arg::with_name("no-threads")
                .long("no-threads")
                .help("Serve clients one at a time without threads"),
        )
        .arg(
            Arg::with_name("data-dir")
                .long("data-dir")
                .value_name("PATH")
                .help("Directory relative queue URLs are resolved in")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("log")
                .short("l")
                .long("log-file")
                .value_name("PATH")
                .help("File used to log events, stderr if not given")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("max-read-msgs")
                .long("max-read-msgs")
                .value_name("N")
                .help("Messages per READ batch before it is cut off")
                .takes_value(true)
                .default_value(&default_msgs),
        )
        .arg(
            Arg::with_name("max-read-bytes")
                .long("max-read-bytes")
                .value_name("N")
                .help("Bytes per READ batch before it is cut off")
                .takes_value(true)
                .default_value(&default_bytes),
        )
        .arg(
            Arg::with_name("max-slots")
                .long("max-slots")
                .value_name("N")
                .help("Largest slot count a client may create a queue with")
                .takes_value(true)
                .default_value(&default_slots),
        )
        .arg(
            Arg::with_name("max-buf-size")
                .long("max-buf-size")
                .value_name("BYTES")
                .help("Largest buffer a client may create a queue with")
                .takes_value(true)
                .default_value(&default_buf_size),
        )
        .get_matches();

    let verbose = parser.is_present("verbose");
    let mut result = ProgramOptions {
        port: DEFAULT_PORT,
        instance: String::from("primary"),
        max_clients: DEFAULT_MAX_CLIENTS,
        max_quiescent_secs: 0,
        debug: verbose || parser.is_present("debug"),
        verbose,
        no_threads: parser.is_present("no-threads"),
        data_dir: env::var(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".")),
        log_filename: None,
        max_read_msgs: DEFAULT_MAX_MESSAGES,
        max_read_bytes: DEFAULT_MAX_BYTES,
        max_slots: DEFAULT_MAX_SLOTS,
        max_buf_size: DEFAULT_MAX_BUF_SIZE,
    };

    if let Some(port) = parser.value_of("port") {
        result.port = parse_or_exit(port, "--port", "a 16 bit unsigned integer");
    }
    if let Some(instance) = parser.value_of("instance") {
        result.instance = String::from(instance);
    }
    if let Some(cmax) = parser.value_of("cmax") {
        result.max_clients = parse_or_exit(cmax, "--cmax", "a positive integer");
        if result.max_clients == 0 {
            eprintln!("The value of --cmax must be a positive integer");
            process::exit(-1);
        }
    }
    if let Some(qmax) = parser.value_of("qmax") {
        result.max_quiescent_secs = parse_or_exit(qmax, "--qmax", "a number of seconds");
    }
    if let Some(msgs) = parser.value_of("max-read-msgs") {
        result.max_read_msgs = parse_or_exit(msgs, "--max-read-msgs", "an unsigned integer");
    }
    if let Some(bytes) = parser.value_of("max-read-bytes") {
        result.max_read_bytes = parse_or_exit(bytes, "--max-read-bytes", "an unsigned integer");
    }

    if let Some(slots) = parser.value_of("max-slots") {
        result.max_slots = parse_or_exit(slots, "--max-slots", "a 32 bit integer");
    }
    if let Some(size) = parser.value_of("max-buf-size") {
        result.max_buf_size = parse_or_exit(size, "--max-buf-size", "a 32 bit integer");
    }

    // Data directory, must exist:

    if let Some(directory) = parser.value_of("data-dir") {
        result.data_dir = PathBuf::from(directory);
    }
    if fs::read_dir(&result.data_dir).is_err() {
        eprintln!(
            "The data directory must be an existing directory, was {}",
            result.data_dir.display()
        );
        process::exit(-1);
    }

    // Log file; we need to be able to write to it:

    if let Some(file) = parser.value_of("log") {
        if let Err(e) = fs::OpenOptions::new().append(true).create(true).open(file) {
            eprintln!("Unable to open/create log file {} : {}", file, e);
            process::exit(-1);
        }
        result.log_filename = Some(String::from(file));
    }

    result
}

fn parse_or_exit<T: std::str::FromStr>(value: &str, option: &str, what: &str) -> T {
    match value.parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("The value of {} must be {}, was {}", option, what, value);
            process::exit(-1);
        }
    }
}
