use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

/// Top-level CLI entry point.
#[derive(Debug, Default, Parser)]
#[command(
    name = "annogate",
    version,
    author,
    about = "Caching HTTP gateway in front of an annotation engine"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Increase logging verbosity (-v, -vv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the annotation HTTP server.
    Serve(ServeArgs),
    /// Print the configuration a query string resolves to, without building a pipeline.
    Resolve(ResolveArgs),
}

#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Override `server.listen_addr`.
    #[arg(long)]
    pub listen: Option<String>,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Query string as sent to `/`, e.g. `annotators=tokenize&outputFormat=xml`.
    #[arg(default_value = "")]
    pub query: String,
    /// Print the JSON on a single line.
    #[arg(long)]
    pub compact: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resolve_with_query() {
        let cli = Cli::try_parse_from(["annogate", "-vv", "resolve", "annotators=tokenize"])
            .expect("parses");
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Some(Commands::Resolve(args)) => {
                assert_eq!(args.query, "annotators=tokenize");
                assert!(!args.compact);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_serve_listen_override() {
        let cli = Cli::try_parse_from(["annogate", "serve", "--listen", "0.0.0.0:9000"])
            .expect("parses");
        match cli.command {
            Some(Commands::Serve(args)) => assert_eq!(args.listen.as_deref(), Some("0.0.0.0:9000")),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
