//! kroj - Inspect and resolve compiled Protocol Buffer descriptor sets
//!
//! This tool loads descriptor sets written by `protoc --descriptor_set_out`,
//! resolves every type reference across files and prints or writes the
//! resolved schema.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, ValueEnum};
use kroj_core::{
    ImportPolicy, ImportVisibility, LoaderConfig, ProtoMapper, RenderConfig, ResolvedSchema,
    Source, StatsVisitor,
};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Extensions treated as descriptor-set containers when scanning a directory
const DESCRIPTOR_EXTENSIONS: &[&str] = &["pb", "desc", "protoset", "binpb"];

/// Inspect and resolve compiled Protocol Buffer descriptor sets
#[derive(Parser, Debug)]
#[command(name = "kroj")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Output directory for rendered .proto files (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "proto")]
    format: OutputFormat,

    /// Fully-qualified name of the root message
    #[arg(long)]
    root: Option<String>,

    /// Fail when a name is declared by several imports instead of taking the first
    #[arg(long)]
    reject_ambiguous: bool,

    /// Only let files see direct and public imports, as protoc does
    #[arg(long)]
    strict_imports: bool,

    /// Sort fields by number in rendered output
    #[arg(long)]
    sort_fields: bool,

    /// Dry run - don't write files, just show what would be written
    #[arg(long)]
    dry_run: bool,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Descriptor set to load; repeat to supply imports separately
    #[arg(short, long)]
    file: Vec<PathBuf>,

    /// Directory of descriptor sets, loaded together
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

/// Output format for the resolved schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Standard .proto format
    Proto,
    /// Element counts
    Summary,
    /// One line per message and enum (for scripting)
    Types,
}

#[derive(Debug, Default)]
struct WriteStats {
    written: usize,
    skipped: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let sources = collect_sources(&cli.input)?;
    let schema = load(&cli, &sources)?;
    emit(&cli, &schema)
}

/// Resolves the input mode into an ordered list of sources
fn collect_sources(input: &InputMode) -> Result<Vec<Source>> {
    if let Some(directory) = &input.directory {
        return scan_directory(directory);
    }

    for file in &input.file {
        if !file.is_file() {
            bail!("Input file does not exist: {}", file.display());
        }
    }
    Ok(input.file.iter().map(|f| Source::from(f.as_path())).collect())
}

/// Finds descriptor sets below a directory, sorted by path
fn scan_directory(directory: &Path) -> Result<Vec<Source>> {
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    let mut paths: Vec<PathBuf> = WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Error walking directory: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            let keep = is_descriptor_file(p);
            if !keep {
                trace!("Skipping {}", p.display());
            }
            keep
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        bail!(
            "No descriptor sets ({}) found in {}",
            DESCRIPTOR_EXTENSIONS.join(", "),
            directory.display()
        );
    }
    debug!("Found {} descriptor set(s)", paths.len());
    Ok(paths.into_iter().map(Source::Path).collect())
}

fn is_descriptor_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false);
    let known = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| DESCRIPTOR_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false);
    !hidden && known
}

fn load(cli: &Cli, sources: &[Source]) -> Result<ResolvedSchema> {
    let mut config = LoaderConfig::new().cache_enabled(false);
    if cli.reject_ambiguous {
        config = config.import_policy(ImportPolicy::RejectAmbiguous);
    }
    if cli.strict_imports {
        config = config.import_visibility(ImportVisibility::DirectAndPublic);
    }

    let mapper = ProtoMapper::new().with_loader_config(config);
    let described: Vec<String> = sources.iter().map(Source::describe).collect();
    let schema = mapper
        .load_sources(sources)
        .with_context(|| format!("Failed to load {}", described.join(", ")))?;

    match &cli.root {
        Some(root) => schema
            .with_root_type(root)
            .with_context(|| format!("Invalid --root {}", root)),
        None => Ok((*schema).clone()),
    }
}

fn emit(cli: &Cli, schema: &ResolvedSchema) -> Result<()> {
    match cli.format {
        OutputFormat::Summary => {
            let mut stats = StatsVisitor::default();
            schema.walk(&mut stats);
            println!("files:    {}", stats.file_count);
            println!("messages: {}", stats.message_count);
            println!("fields:   {}", stats.field_count);
            println!("maps:     {}", stats.map_count);
            println!("enums:    {}", stats.enum_count);
            if let Some(root) = schema.root() {
                println!("root:     {}", root.full_name());
            }
            Ok(())
        }
        OutputFormat::Types => {
            for message in schema.messages().iter().filter(|m| !m.is_map_entry()) {
                println!("message {}", message.full_name());
            }
            for enum_type in schema.enums() {
                println!("enum {}", enum_type.full_name());
            }
            Ok(())
        }
        OutputFormat::Proto => {
            let config = RenderConfig::new().sort_fields(cli.sort_fields);
            let rendered = schema.render(&config);
            let Some(output) = &cli.output else {
                for (name, content) in rendered {
                    println!("// {}", name);
                    print!("{}", content);
                }
                return Ok(());
            };

            let mut stats = WriteStats::default();
            for (name, content) in rendered {
                let path = safe_output_path(output, &name)?;
                if cli.dry_run {
                    println!("Would write: {}", path.display());
                    if cli.verbose > 0 {
                        println!("---");
                        println!("{}", content);
                        println!("---");
                    }
                    continue;
                }
                if path.exists() && !cli.force {
                    info!("Skipping existing file: {}", path.display());
                    stats.skipped += 1;
                    continue;
                }
                write_proto_file(&path, &content)?;
                println!("Wrote {}", path.display());
                stats.written += 1;
            }
            info!(
                "Summary: {} written, {} skipped (use --force to overwrite)",
                stats.written, stats.skipped
            );
            Ok(())
        }
    }
}

/// Joins a descriptor file name onto the output directory.
///
/// File names come from the descriptor set, so anything that could escape
/// the output directory is rejected.
fn safe_output_path(output_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let relative = Path::new(file_name);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || file_name.is_empty() {
        bail!("Refusing to write outside the output directory: {}", file_name);
    }
    Ok(output_dir.join(relative))
}

/// Write a proto file to disk, creating parent directories
fn write_proto_file(output_path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use kroj_core::generator::{ObjectShape, Property, Shape};
    use kroj_core::SchemaGenerator;
    use prost::Message;
    use tempfile::TempDir;

    fn write_set(dir: &Path, name: &str) -> PathBuf {
        let shape = Shape::Object(ObjectShape::new("Ping", || {
            vec![Property::of::<u64>("sequence"), Property::of::<String>("note")]
        }));
        let schema = SchemaGenerator::new().generate_from_shape(&shape).unwrap();
        let path = dir.join(name);
        fs::write(&path, schema.to_file_descriptor_set().encode_to_vec()).unwrap();
        path
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("kroj").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_input_modes_are_exclusive() {
        assert!(Cli::try_parse_from(["kroj"]).is_err());
        assert!(Cli::try_parse_from(["kroj", "-f", "a.pb", "-d", "dir"]).is_err());
        let parsed = cli(&["-f", "a.pb", "-f", "b.pb", "--format", "types"]);
        assert_eq!(parsed.input.file.len(), 2);
        assert_eq!(parsed.format, OutputFormat::Types);
    }

    #[test]
    fn test_safe_output_path() {
        let out = Path::new("/tmp/out");
        assert_eq!(
            safe_output_path(out, "google/protobuf/empty.proto").unwrap(),
            out.join("google/protobuf/empty.proto")
        );
        assert!(safe_output_path(out, "../escape.proto").is_err());
        assert!(safe_output_path(out, "a/../../escape.proto").is_err());
        assert!(safe_output_path(out, "/etc/passwd").is_err());
        assert!(safe_output_path(out, "").is_err());
    }

    #[test]
    fn test_is_descriptor_file() {
        assert!(is_descriptor_file(Path::new("/tmp/set.pb")));
        assert!(is_descriptor_file(Path::new("/tmp/set.PROTOSET")));
        assert!(!is_descriptor_file(Path::new("/tmp/.hidden.pb")));
        assert!(!is_descriptor_file(Path::new("/tmp/schema.proto")));
    }

    #[test]
    fn test_directory_scan_is_sorted() {
        let temp_dir = TempDir::new().unwrap();
        write_set(temp_dir.path(), "b.pb");
        write_set(temp_dir.path(), "a.desc");
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let sources = scan_directory(temp_dir.path()).unwrap();
        let names: Vec<String> = sources
            .iter()
            .map(|s| match s {
                Source::Path(p) => p.file_name().unwrap().to_string_lossy().to_string(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(names, vec!["a.desc", "b.pb"]);

        let empty = TempDir::new().unwrap();
        assert!(scan_directory(empty.path()).is_err());
    }

    #[test]
    fn test_load_and_write() {
        let temp_dir = TempDir::new().unwrap();
        let set = write_set(temp_dir.path(), "ping.pb");
        let out = temp_dir.path().join("out");

        let set_arg = set.to_string_lossy().to_string();
        let out_arg = out.to_string_lossy().to_string();
        let parsed = cli(&["-f", &set_arg, "-o", &out_arg, "--root", "Ping"]);
        let sources = collect_sources(&parsed.input).unwrap();
        let schema = load(&parsed, &sources).unwrap();
        assert_eq!(schema.root().unwrap().full_name(), "Ping");

        emit(&parsed, &schema).unwrap();
        let written = fs::read_to_string(out.join("Ping.proto")).unwrap();
        assert!(written.contains("message Ping {"));
        assert!(written.contains("uint64 sequence = 1;"));

        let bad_root = cli(&["-f", &set_arg, "--root", "Missing"]);
        assert!(load(&bad_root, &sources).is_err());
    }
}
