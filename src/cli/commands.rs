use crate::export::Shape;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Recover network topologies from topotest builder routines
#[derive(Parser, Debug)]
#[command(
    name = "topoextract",
    about = "Recover network topologies from topotest builder routines",
    version,
    author,
    long_about = "topoextract locates the topology builder inside a topotest module and \
                  recovers the router/switch graph it builds, either by executing it against \
                  a simulated framework runtime or by inspecting its syntax tree or text. \
                  The graph is exported as deterministic JSON or YAML."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Extract the topology of one test module",
        long_about = "Extracts the topology built by one test module and prints it.\n\n\
                      Exit status: 0 when a topology was extracted, 2 when the builder \
                      produced no nodes, 1 when every strategy failed.\n\n\
                      Examples:\n  \
                      topoextract extract bgp_basic/test_bgp_basic.py\n  \
                      topoextract extract test_ospf.py --shape simple --format yaml\n  \
                      topoextract extract test_ospf.py --strategy syntax,text -o ospf.json"
    )]
    Extract(ExtractArgs),

    #[command(
        about = "Export every test module under a topotests tree",
        long_about = "Discovers test_*.py modules below DIR and writes one JSON topology per \
                      module, next to the module or into --output-dir.\n\n\
                      Exit status: 0 when at least one topology was exported, 1 otherwise.\n\n\
                      Examples:\n  \
                      topoextract batch tests/topotests\n  \
                      topoextract batch tests/topotests --filter bgp,ospf --limit 20\n  \
                      topoextract batch tests/topotests --output-dir out --summary out/summary.json"
    )]
    Batch(BatchArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractArgs {
    #[arg(value_name = "FILE", help = "Test module to extract from")]
    pub file: PathBuf,

    #[arg(
        short = 's',
        long,
        value_name = "LIST",
        help = "Comma separated strategy order (dynamic, syntax, text)"
    )]
    pub strategy: Option<String>,

    #[arg(long, value_enum, help = "Export shape")]
    pub shape: Option<ShapeArg>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "json",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write output to file instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct BatchArgs {
    #[arg(value_name = "DIR", help = "Root of the topotests tree")]
    pub root: PathBuf,

    #[arg(
        short = 's',
        long,
        value_name = "LIST",
        help = "Comma separated strategy order (dynamic, syntax, text)"
    )]
    pub strategy: Option<String>,

    #[arg(long, value_enum, help = "Export shape")]
    pub shape: Option<ShapeArg>,

    #[arg(
        long,
        value_name = "DIR",
        help = "Write <name>.json files here instead of next to each test"
    )]
    pub output_dir: Option<PathBuf>,

    #[arg(
        long,
        value_name = "LIST",
        value_delimiter = ',',
        help = "Only process paths containing one of these substrings"
    )]
    pub filter: Vec<String>,

    #[arg(long, value_name = "N", help = "Process at most N files")]
    pub limit: Option<usize>,

    #[arg(long, value_name = "FILE", help = "Write the batch summary as JSON")]
    pub summary: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeArg {
    Rich,
    Simple,
}

impl From<ShapeArg> for Shape {
    fn from(arg: ShapeArg) -> Self {
        match arg {
            ShapeArg::Rich => Shape::Rich,
            ShapeArg::Simple => Shape::Simple,
        }
    }
}
