use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::Result;
use crate::staging::StagingMode;
use crate::verify::{DEFAULT_JOBS, VerifyOptions};

#[derive(Parser, Debug)]
#[command(name = "torrentzip")]
#[command(version)]
#[command(about = "Create and check TorrentZip archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  torrentzip create -o roms.zip game.bin game.cue   pack two files\n  \
  torrentzip verify --fail-dir bad/ /srv/roms       check every zip below /srv/roms\n  \
  torrentzip list -l roms.zip                       show entries and the archive comment")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// More log output (-vv for trace)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Less log output (-qq => errors only)
    #[arg(short = 'q', long, global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pack files and directories into a TorrentZip archive
    Create(CreateArgs),
    /// Check that archives are already TorrentZipped
    Verify(VerifyArgs),
    /// List the entries of an archive
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Archive to write
    #[arg(short = 'o', long = "out", value_name = "ZIP")]
    pub output: PathBuf,

    /// Directory for the staging file
    #[arg(long, value_name = "DIR", conflicts_with = "in_memory")]
    pub temp_dir: Option<PathBuf>,

    /// Stage entries in memory instead of a temporary file
    #[arg(long)]
    pub in_memory: bool,

    /// Relative paths of files or directories to add
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,
}

impl CreateArgs {
    pub fn staging(&self) -> StagingMode {
        if self.in_memory {
            StagingMode::Memory
        } else {
            StagingMode::TempFile {
                dir: self.temp_dir.clone(),
            }
        }
    }
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Number of archives checked in parallel
    #[arg(short = 'j', long, value_name = "N", default_value_t = DEFAULT_JOBS)]
    pub jobs: usize,

    /// Copy failing archives into this directory
    #[arg(long, value_name = "DIR")]
    pub fail_dir: Option<PathBuf>,

    /// Stage rebuilt archives in memory
    #[arg(long)]
    pub in_memory: bool,

    /// Archives or directories to scan for *.zip
    #[arg(value_name = "ROOT", required = true)]
    pub roots: Vec<PathBuf>,
}

impl VerifyArgs {
    pub fn options(&self) -> VerifyOptions {
        VerifyOptions {
            jobs: self.jobs,
            fail_dir: self.fail_dir.clone(),
            staging: if self.in_memory {
                StagingMode::Memory
            } else {
                StagingMode::default()
            },
        }
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Show sizes, CRC and timestamps
    #[arg(short = 'l')]
    pub long: bool,

    /// Archive to list
    #[arg(value_name = "ZIP")]
    pub archive: PathBuf,
}

impl Cli {
    /// Log filter used when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        match (self.verbose, self.quiet) {
            (0, 0) => "info",
            (1, _) => "debug",
            (v, _) if v > 1 => "trace",
            (_, 1) => "warn",
            _ => "error",
        }
    }
}

/// A file or directory to be stored, with its archive name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub path: PathBuf,
    /// `/`-separated; directories end with `/`.
    pub name: String,
    pub is_dir: bool,
}

/// Expand `paths`, relative to `base`, into archive inputs.
///
/// Directories are walked recursively. Only directories without children
/// get an entry of their own, since the files below imply the rest.
pub fn collect_inputs(base: &Path, paths: &[PathBuf]) -> Result<Vec<Input>> {
    let mut inputs = Vec::new();
    for path in paths {
        check_relative(path)?;
        for entry in WalkDir::new(base.join(path)).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            let relative = entry.path().strip_prefix(base).map_err(|_| {
                invalid_input(format!("{} is outside {}", entry.path().display(), base.display()))
            })?;
            if relative.as_os_str().is_empty() {
                continue;
            }

            if entry.file_type().is_dir() {
                let empty = std::fs::read_dir(entry.path())?.next().is_none();
                if empty {
                    inputs.push(Input {
                        path: entry.path().to_path_buf(),
                        name: format!("{}/", entry_name(relative)?),
                        is_dir: true,
                    });
                }
            } else {
                inputs.push(Input {
                    path: entry.path().to_path_buf(),
                    name: entry_name(relative)?,
                    is_dir: false,
                });
            }
        }
    }
    Ok(inputs)
}

fn check_relative(path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(
                    invalid_input(format!("{} leaves the current directory", path.display()))
                        .into(),
                );
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid_input(format!("{} is an absolute path", path.display())).into());
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

/// Archive name for a relative path.
///
/// `.` components are dropped; absolute paths, `..` and names that are not
/// UTF-8 are refused.
pub fn entry_name(path: &Path) -> Result<String> {
    check_relative(path)?;
    let parts = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_str().ok_or_else(|| {
                invalid_input(format!("{} is not valid UTF-8", path.display()))
            })),
            _ => None,
        })
        .collect::<io::Result<Vec<_>>>()?;
    if parts.is_empty() {
        return Err(invalid_input(format!("{} names no file", path.display())).into());
    }
    Ok(parts.join("/"))
}

fn invalid_input(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_create() {
        let cli = Cli::parse_from([
            "torrentzip", "-v", "create", "-o", "out.zip", "--in-memory", "a", "b",
        ]);
        assert_eq!(cli.log_level(), "debug");
        match cli.command {
            Command::Create(args) => {
                assert_eq!(args.output, PathBuf::from("out.zip"));
                assert_eq!(args.staging(), StagingMode::Memory);
                assert_eq!(args.inputs, [PathBuf::from("a"), PathBuf::from("b")]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn staging_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "torrentzip", "create", "-o", "x.zip", "--in-memory", "--temp-dir", "/tmp", "a",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn parses_verify_defaults() {
        let cli = Cli::parse_from(["torrentzip", "verify", "-q", "roms"]);
        assert_eq!(cli.log_level(), "warn");
        let Command::Verify(args) = cli.command else {
            panic!("expected verify");
        };
        let options = args.options();
        assert_eq!(options.jobs, DEFAULT_JOBS);
        assert_eq!(options.fail_dir, None);
        assert_eq!(options.staging, StagingMode::default());
    }

    #[test]
    fn entry_names_are_relative_and_slash_separated() {
        assert_eq!(entry_name(Path::new("./a/b.txt")).unwrap(), "a/b.txt");
        assert_eq!(entry_name(Path::new("a/./b")).unwrap(), "a/b");
        assert!(entry_name(Path::new("../escape")).is_err());
        assert!(entry_name(Path::new(".")).is_err());
        #[cfg(unix)]
        assert!(entry_name(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn collects_files_and_empty_directories() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("set");
        fs::create_dir_all(base.join("empty")).unwrap();
        fs::create_dir_all(base.join("full")).unwrap();
        fs::write(base.join("full/x.bin"), b"x").unwrap();
        fs::write(base.join("top.txt"), b"top").unwrap();

        let inputs = collect_inputs(root.path(), &[PathBuf::from("./set")]).unwrap();
        let names: Vec<_> = inputs.iter().map(|i| (i.name.as_str(), i.is_dir)).collect();
        assert_eq!(
            names,
            [
                ("set/empty/", true),
                ("set/full/x.bin", false),
                ("set/top.txt", false),
            ]
        );
        assert_eq!(inputs[2].path, root.path().join("./set").join("top.txt"));
    }

    #[test]
    fn collect_refuses_paths_outside_the_base() {
        let root = tempfile::tempdir().unwrap();
        assert!(collect_inputs(root.path(), &[PathBuf::from("../x")]).is_err());
        assert!(collect_inputs(root.path(), &[root.path().to_path_buf()]).is_err());
    }

    #[test]
    fn missing_input_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(collect_inputs(root.path(), &[PathBuf::from("nope.bin")]).is_err());
    }
}
