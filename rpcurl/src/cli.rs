//! # CLI
//!
//! This module defines the command-line interface of `rpcurl` using `clap`.
//!
//! Flag names follow grpcurl. Only syntax is checked here; the rules relating flags to each
//! other and to the positional arguments live in [`crate::config`].
use clap::{ArgAction, Parser};
use std::path::PathBuf;

const USAGE_NOTES: &str = "\
The 'address' is only optional when used with 'list' or 'describe' and a
protoset or proto flag is provided.

If 'list' is indicated, the symbol (if present) should be a fully-qualified
service name. If present, all methods of that service are listed. If not
present, all exposed services are listed, or all services defined in protosets.

If 'describe' is indicated, the descriptor for the given symbol is shown. The
symbol should be a fully-qualified service, enum, or message name. If no symbol
is given then the descriptors for all exposed or known services are shown.

If neither verb is present, the symbol must be a fully-qualified method name in
'service/method' or 'service.method' format. In this case, the request body will
be used to invoke the named method. If no body is given but one is required
(i.e. the method is unary or server-streaming), an empty instance of the
method's request type will be sent.

The address will typically be in the form \"host:port\", or an http(s) URL whose
path is forwarded in the 'x-grpc-path' header.";

#[derive(Parser, Debug)]
#[command(
    name = "rpcurl",
    version,
    about = "Dynamic gRPC CLI",
    override_usage = "rpcurl [OPTIONS] [address] [list|describe] [symbol]",
    after_help = USAGE_NOTES
)]
pub struct Cli {
    /// [address] [list|describe] [symbol]
    #[arg(value_name = "ARGS")]
    pub args: Vec<String>,

    /// Use plain-text HTTP/2 when connecting to server (no TLS).
    #[arg(long)]
    pub plaintext: bool,

    /// Skip server certificate and domain verification. (NOT SECURE!)
    #[arg(long)]
    pub insecure: bool,

    /// File containing trusted root certificates for verifying the server.
    #[arg(long, value_name = "FILE")]
    pub cacert: Option<PathBuf>,

    /// File containing client certificate (public key), to present to the server.
    #[arg(long, value_name = "FILE")]
    pub cert: Option<PathBuf>,

    /// File containing client private key, to present to the server.
    #[arg(long, value_name = "FILE")]
    pub key: Option<PathBuf>,

    /// Use Application Layer Transport Security (ALTS) when connecting to server.
    #[arg(long)]
    pub alts: bool,

    /// Address of the ALTS handshaker service.
    #[arg(long, value_name = "ADDRESS")]
    pub alts_handshaker_service: Option<String>,

    /// Expected ALTS target service account. May be specified multiple times.
    #[arg(long = "alts-target-service-account", value_name = "ACCOUNT")]
    pub alts_target_service_accounts: Vec<String>,

    /// Encoded FileDescriptorSet to use as the schema source. May be specified multiple times.
    #[arg(long = "protoset", value_name = "FILE")]
    pub protosets: Vec<PathBuf>,

    /// Proto source file to compile and use as the schema source. May be specified multiple
    /// times.
    #[arg(long = "proto", value_name = "FILE")]
    pub protos: Vec<PathBuf>,

    /// Directory searched for imports of --proto files. May be specified multiple times.
    #[arg(long = "import-path", value_name = "DIR")]
    pub import_paths: Vec<PathBuf>,

    /// Header ('name: value') sent with both reflection requests and the RPC.
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Header ('name: value') sent only with the RPC.
    #[arg(long = "rpc-header", value_name = "HEADER")]
    pub rpc_headers: Vec<String>,

    /// Header ('name: value') sent only with reflection requests.
    #[arg(long = "reflect-header", value_name = "HEADER")]
    pub reflect_headers: Vec<String>,

    /// Expand '${NAME}' references in headers with environment variables.
    #[arg(long)]
    pub expand_headers: bool,

    /// Value of the :authority pseudo-header and the TLS server name.
    #[arg(long)]
    pub authority: Option<String>,

    /// Override the server name used to verify the server certificate.
    #[arg(long)]
    pub servername: Option<String>,

    /// Value prepended to the User-Agent header.
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Request data. '@' reads it from standard input.
    #[arg(short = 'd', long = "data", value_name = "DATA")]
    pub data: Option<String>,

    /// Format of request data and responses: 'json' or 'text'.
    #[arg(long, default_value = "json")]
    pub format: String,

    /// Ignore unknown fields in JSON request data.
    #[arg(long)]
    pub allow_unknown_fields: bool,

    /// Seconds to wait for the connection to be established.
    #[arg(long, value_name = "SECONDS", allow_negative_numbers = true)]
    pub connect_timeout: Option<f64>,

    /// Print a failing status using the response format.
    #[arg(long)]
    pub format_error: bool,

    /// Seconds between HTTP/2 keepalive pings.
    #[arg(long, value_name = "SECONDS", allow_negative_numbers = true)]
    pub keepalive_time: Option<f64>,

    /// Seconds the whole operation may take.
    #[arg(long, value_name = "SECONDS", allow_negative_numbers = true)]
    pub max_time: Option<f64>,

    /// Maximum size in bytes of a received message.
    #[arg(long = "max-msg-sz", value_name = "BYTES", allow_negative_numbers = true)]
    pub max_msg_size: Option<i64>,

    /// Include fields with default values in JSON output.
    #[arg(long)]
    pub emit_defaults: bool,

    /// Write the schema of the listed, described or invoked elements to this file.
    #[arg(long, value_name = "FILE")]
    pub protoset_out: Option<PathBuf>,

    /// Print a template of described messages.
    #[arg(long)]
    pub msg_template: bool,

    /// Verbose output. Repeat for very verbose output with timing data.
    #[arg(short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    /// Use server reflection. Defaults to true unless --protoset or --proto is given.
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub use_reflection: Option<bool>,

    /// The address is the path of a Unix domain socket.
    #[arg(long)]
    pub unix: bool,

    /// Log TLS secrets to this file.
    #[arg(long, env = "SSLKEYLOGFILE", hide = true)]
    pub ssl_key_log_file: Option<PathBuf>,
}
