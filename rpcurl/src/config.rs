//! # Configuration
//!
//! Turns the parsed [`Cli`] into an immutable [`Config`], applying every rule that relates
//! flags to each other and to the positional arguments.
//!
//! Problems with the command line itself are usage errors. Inconsistent transport flags are
//! configuration errors. Flags that are accepted but have no effect produce warnings.
use crate::cli::Cli;
use crate::error::CliError;
use rpcurl_core::format::{Format, FormatOptions};
use rpcurl_core::target::{ParsedTarget, parse_target};
use rpcurl_core::transport::{self, TransportConfig, TransportFlags};
use std::path::PathBuf;
use std::time::Duration;

/// What the run does once the schema source is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// List services, or the methods of one service.
    List { service: Option<String> },
    /// Describe one symbol, or every service.
    Describe { symbol: Option<String> },
    /// Invoke a method.
    Invoke { method: String },
}

/// Where the schema comes from, besides server reflection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSchema {
    None,
    Protosets(Vec<PathBuf>),
    Protos {
        import_paths: Vec<PathBuf>,
        files: Vec<PathBuf>,
    },
}

/// Headers given on the command line, grouped by where they are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    /// Sent with reflection requests and the RPC.
    pub common: Vec<String>,
    pub rpc: Vec<String>,
    pub reflection: Vec<String>,
    /// Expand `${NAME}` references before use.
    pub expand: bool,
}

#[derive(Debug)]
pub struct Config {
    pub verb: Verb,
    pub target: Option<ParsedTarget>,
    pub transport: TransportConfig,
    pub use_reflection: bool,
    pub file_schema: FileSchema,
    pub headers: Headers,
    /// Request data, `@` meaning standard input.
    pub data: Option<String>,
    pub format: Format,
    pub format_options: FormatOptions,
    pub format_error: bool,
    pub verbosity: u8,
    pub max_time: Option<Duration>,
    pub protoset_out: Option<PathBuf>,
    pub msg_template: bool,
    /// Advisory messages for the user. They never change what the run does.
    pub warnings: Vec<String>,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, CliError> {
        let mut warnings = Vec::new();
        let mut args = cli.args.into_iter().peekable();

        let first = args.peek().ok_or_else(|| usage("Too few arguments."))?;

        let target = if is_verb(first) {
            None
        } else {
            let raw = args.next().unwrap_or_default();
            Some(parse_target(&unix_address(raw, cli.unix)?))
        };

        let verb_or_symbol = args.next().ok_or_else(|| usage("Too few arguments."))?;

        let verb = match verb_or_symbol.as_str() {
            "list" | "describe" => {
                if cli.data.is_some() {
                    warnings.push("The -d argument is not used with 'list' or 'describe' verb.".into());
                }
                if !cli.rpc_headers.is_empty() {
                    warnings.push(
                        "The --rpc-header argument is not used with 'list' or 'describe' verb."
                            .into(),
                    );
                }

                let symbol = args.next();
                if verb_or_symbol == "list" {
                    Verb::List { service: symbol }
                } else {
                    Verb::Describe { symbol }
                }
            }
            _ => Verb::Invoke {
                method: verb_or_symbol,
            },
        };

        if args.next().is_some() {
            return Err(usage("Too many arguments."));
        }

        let has_files = !cli.protosets.is_empty() || !cli.protos.is_empty();

        if matches!(verb, Verb::Invoke { .. }) && target.is_none() {
            return Err(usage("No host:port specified."));
        }
        if !has_files && target.is_none() {
            return Err(usage(
                "No host:port specified, no protoset specified, and no proto sources specified.",
            ));
        }
        if !cli.protosets.is_empty() && !cli.reflect_headers.is_empty() {
            warnings.push(
                "The --reflect-header argument is not used when --protoset files are used.".into(),
            );
        }
        if !cli.protosets.is_empty() && !cli.protos.is_empty() {
            return Err(usage(
                "Use either --protoset files or --proto files, but not both.",
            ));
        }
        if !cli.import_paths.is_empty() && cli.protos.is_empty() {
            warnings.push(
                "The --import-path argument is not used unless --proto files are used.".into(),
            );
        }
        if cli.use_reflection == Some(false) && !has_files {
            return Err(usage(
                "No protoset files or proto files specified and --use-reflection set to false.",
            ));
        }

        let use_reflection = cli.use_reflection.unwrap_or(!has_files);
        if use_reflection && target.is_none() {
            return Err(usage("No host:port specified."));
        }

        let connect_timeout = non_negative_seconds("connect-timeout", cli.connect_timeout)?;
        let keepalive_time = non_negative_seconds("keepalive-time", cli.keepalive_time)?;
        let max_time = non_negative_seconds("max-time", cli.max_time)?;
        let max_msg_size = match cli.max_msg_size {
            Some(size) if size < 0 => {
                return Err(usage("The --max-msg-sz argument must not be negative."));
            }
            Some(size) => Some(usize::try_from(size).unwrap_or(usize::MAX)),
            None => None,
        };

        let format: Format = cli
            .format
            .parse()
            .map_err(|_| usage("The --format option must be 'json' or 'text'."))?;
        if cli.emit_defaults && format != Format::Json {
            warnings.push("The --emit-defaults is only used when using json format.".into());
        }

        let flags = TransportFlags {
            plaintext: cli.plaintext,
            alts: cli.alts,
            insecure: cli.insecure,
            cacert: cli.cacert,
            cert: cli.cert,
            key: cli.key,
            alts_handshaker_service: cli.alts_handshaker_service,
            alts_target_service_accounts: cli.alts_target_service_accounts,
            authority: cli.authority,
            servername: cli.servername,
            user_agent: cli.user_agent,
            connect_timeout,
            keepalive_time,
            max_msg_size,
            key_log_file: cli.ssl_key_log_file,
        };

        let transport =
            transport::negotiate(&flags, target.as_ref(), env!("CARGO_PKG_VERSION"))?;
        warnings.extend(transport.warnings.iter().cloned());

        let file_schema = if !cli.protosets.is_empty() {
            FileSchema::Protosets(cli.protosets)
        } else if !cli.protos.is_empty() {
            FileSchema::Protos {
                import_paths: cli.import_paths,
                files: cli.protos,
            }
        } else {
            FileSchema::None
        };

        Ok(Config {
            verb,
            target,
            transport,
            use_reflection,
            file_schema,
            headers: Headers {
                common: cli.headers,
                rpc: cli.rpc_headers,
                reflection: cli.reflect_headers,
                expand: cli.expand_headers,
            },
            data: cli.data,
            format,
            format_options: FormatOptions {
                emit_defaults: cli.emit_defaults,
                allow_unknown_fields: cli.allow_unknown_fields,
                // Without verbose output, separators let the output be piped into another run.
                include_text_separator: cli.verbose == 0,
            },
            format_error: cli.format_error,
            verbosity: cli.verbose,
            max_time: max_time.filter(|d| !d.is_zero()),
            protoset_out: cli.protoset_out,
            msg_template: cli.msg_template,
            warnings,
        })
    }
}

fn usage(message: &str) -> CliError {
    CliError::Usage(message.to_string())
}

fn is_verb(arg: &str) -> bool {
    arg == "list" || arg == "describe"
}

fn unix_address(raw: String, unix: bool) -> Result<String, CliError> {
    if !unix {
        return Ok(raw);
    }
    if !cfg!(unix) {
        return Err(usage(
            "The --unix argument is only supported on unix platforms.",
        ));
    }
    if raw.starts_with("unix://") {
        Ok(raw)
    } else {
        Ok(format!("unix://{raw}"))
    }
}

fn non_negative_seconds(flag: &str, value: Option<f64>) -> Result<Option<Duration>, CliError> {
    match value {
        Some(seconds) if seconds < 0.0 => Err(CliError::Usage(format!(
            "The --{flag} argument must not be negative."
        ))),
        Some(seconds) => Ok(Some(seconds_to_duration(seconds))),
        None => Ok(None),
    }
}

/// Converts float seconds into a duration, saturating instead of overflowing.
pub fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(if seconds > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rpcurl_core::transport::{TransportConfigError, TransportMode};

    fn config(args: &[&str]) -> Result<Config, CliError> {
        let cli = Cli::try_parse_from(std::iter::once("rpcurl").chain(args.iter().copied()))
            .expect("arguments should parse");
        Config::from_cli(cli)
    }

    fn usage_message(result: Result<Config, CliError>) -> String {
        match result {
            Err(CliError::Usage(message)) => message,
            other => panic!("expected a usage error, got {other:?}"),
        }
    }

    #[test]
    fn invoke_needs_target_and_method() {
        assert_eq!(usage_message(config(&[])), "Too few arguments.");
        assert_eq!(usage_message(config(&["localhost:1"])), "Too few arguments.");

        let config = config(&["--plaintext", "localhost:1", "pkg.Svc/Method"]).unwrap();
        assert_eq!(
            config.verb,
            Verb::Invoke {
                method: "pkg.Svc/Method".to_string()
            }
        );
        assert!(config.use_reflection);
    }

    #[test]
    fn too_many_arguments_are_rejected() {
        assert_eq!(
            usage_message(config(&["localhost:1", "list", "a.B", "extra"])),
            "Too many arguments."
        );
    }

    #[test]
    fn list_without_address_needs_files() {
        assert_eq!(
            usage_message(config(&["list"])),
            "No host:port specified, no protoset specified, and no proto sources specified."
        );

        let config = config(&["--protoset", "x.protoset", "list"]).unwrap();
        assert_eq!(config.verb, Verb::List { service: None });
        assert!(!config.use_reflection);
        assert_eq!(
            config.file_schema,
            FileSchema::Protosets(vec![PathBuf::from("x.protoset")])
        );
    }

    #[test]
    fn forced_reflection_needs_an_address() {
        assert_eq!(
            usage_message(config(&[
                "--use-reflection",
                "--protoset",
                "x.protoset",
                "describe"
            ])),
            "No host:port specified."
        );
    }

    #[test]
    fn protosets_and_protos_are_exclusive() {
        assert_eq!(
            usage_message(config(&[
                "--protoset",
                "a.protoset",
                "--proto",
                "a.proto",
                "list"
            ])),
            "Use either --protoset files or --proto files, but not both."
        );
    }

    #[test]
    fn disabling_reflection_needs_files() {
        assert_eq!(
            usage_message(config(&["--use-reflection=false", "localhost:1", "list"])),
            "No protoset files or proto files specified and --use-reflection set to false."
        );
    }

    #[test]
    fn reflection_can_be_combined_with_files() {
        let config = config(&[
            "--use-reflection",
            "--proto",
            "a.proto",
            "--plaintext",
            "localhost:1",
            "list",
        ])
        .unwrap();

        assert!(config.use_reflection);
        assert!(matches!(config.file_schema, FileSchema::Protos { .. }));
    }

    #[test]
    fn negative_numbers_are_usage_errors() {
        for (flag, message) in [
            ("--connect-timeout=-1", "The --connect-timeout argument must not be negative."),
            ("--keepalive-time=-1", "The --keepalive-time argument must not be negative."),
            ("--max-time=-0.5", "The --max-time argument must not be negative."),
            ("--max-msg-sz=-10", "The --max-msg-sz argument must not be negative."),
        ] {
            assert_eq!(usage_message(config(&[flag, "localhost:1", "list"])), message);
        }
    }

    #[test]
    fn unknown_format_is_a_usage_error() {
        assert_eq!(
            usage_message(config(&["--format", "yaml", "localhost:1", "list"])),
            "The --format option must be 'json' or 'text'."
        );
    }

    #[test]
    fn ignored_flags_produce_warnings() {
        let config = config(&[
            "--plaintext",
            "-d",
            "{}",
            "--rpc-header",
            "a: b",
            "--format",
            "text",
            "--emit-defaults",
            "--import-path",
            "protos",
            "localhost:1",
            "list",
        ])
        .unwrap();

        assert_eq!(config.warnings.len(), 4);
        assert!(config.warnings.iter().any(|w| w.contains("-d argument")));
        assert!(config.warnings.iter().any(|w| w.contains("--emit-defaults")));
    }

    #[test]
    fn plaintext_and_alts_is_a_config_error() {
        let result = config(&["--plaintext", "--alts", "localhost:1", "list"]);
        assert!(matches!(
            result,
            Err(CliError::Config(TransportConfigError::PlaintextAndAlts))
        ));
    }

    #[test]
    fn http_url_selects_plaintext() {
        let config = config(&["http://localhost:8080/prefix", "list"]).unwrap();

        assert!(matches!(config.transport.mode, TransportMode::Plaintext));
        assert_eq!(
            config.target.as_ref().and_then(ParsedTarget::routing_path),
            Some("/prefix")
        );
    }

    #[test]
    fn verbose_output_drops_text_separators() {
        assert!(config(&["localhost:1", "list"]).unwrap().format_options.include_text_separator);
        assert!(!config(&["-v", "localhost:1", "list"]).unwrap().format_options.include_text_separator);
    }

    #[cfg(unix)]
    #[test]
    fn unix_flag_prefixes_the_address() {
        let config = config(&["--unix", "--plaintext", "/tmp/sock", "list"]).unwrap();
        assert_eq!(config.target.unwrap().address, "unix:///tmp/sock");
    }

    #[test]
    fn durations_saturate() {
        assert_eq!(seconds_to_duration(1.5), Duration::from_millis(1500));
        assert_eq!(seconds_to_duration(f64::MAX), Duration::MAX);
        assert_eq!(config(&["--max-time=0", "localhost:1", "list"]).unwrap().max_time, None);
    }
}
