//! The interactive command loop
//!
//! Each line read after the `% ` prompt is split on whitespace into a command and its
//! arguments. Failed commands are reported on the error stream and the loop goes on;
//! `exit` or the end of input shuts the volume down.
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use flat_fs::{ExportOutcome, FlatFileSystem, Listing, OverwriteDecision, BLOCK_SZ};
use log::debug;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const IMPORT_USAGE: &str = "import <external file> <internal name>";
const EXPORT_USAGE: &str = "export <internal name> <external file>";
const RM_USAGE: &str = "rm <internal name>";
const COMMANDS: &str = "import, export, ls, rm, quota, fsck, exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Empty,
    Import { external: &'a str, internal: &'a str },
    Export { internal: &'a str, external: &'a str },
    Rm(&'a str),
    Ls,
    Quota,
    Fsck,
    Exit,
    /// a known command with the wrong number of arguments
    Usage(&'static str),
    Unknown(&'a str),
}

pub fn parse(line: &str) -> Command<'_> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        &[] => Command::Empty,
        &["import", external, internal] => Command::Import { external, internal },
        &["import", ..] => Command::Usage(IMPORT_USAGE),
        &["export", internal, external] => Command::Export { internal, external },
        &["export", ..] => Command::Usage(EXPORT_USAGE),
        &["rm", name] => Command::Rm(name),
        &["rm", ..] => Command::Usage(RM_USAGE),
        &["ls", ..] => Command::Ls,
        &["quota", ..] => Command::Quota,
        &["fsck", ..] => Command::Fsck,
        &["exit", ..] => Command::Exit,
        &[other, ..] => Command::Unknown(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Modification time as an RFC 3339 UTC timestamp
fn format_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| secs.to_string())
}

/// Ask what to do about an existing export target; end of input aborts.
fn ask_overwrite(input: &mut impl BufRead, out: &mut impl Write, target: &Path) -> OverwriteDecision {
    let mut prompt = |out: &mut dyn Write, text: &str| -> io::Result<String> {
        write!(out, "{}", text)?;
        out.flush()?;
        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(answer.trim().to_string())
    };
    loop {
        let question = format!(
            "{} exists, overwrite? [y]es / [n]o, rename / [a]bort ",
            target.display()
        );
        let answer = match prompt(&mut *out, &question) {
            Ok(answer) => answer,
            Err(_) => return OverwriteDecision::Abort,
        };
        match answer.as_str() {
            "y" | "yes" => return OverwriteDecision::Overwrite,
            "a" | "abort" => return OverwriteDecision::Abort,
            "n" | "no" => match prompt(&mut *out, "new name: ") {
                Ok(name) if !name.is_empty() => return OverwriteDecision::Rename(PathBuf::from(name)),
                Ok(_) => continue,
                Err(_) => return OverwriteDecision::Abort,
            },
            _ => continue,
        }
    }
}

pub struct Shell<R, W, E> {
    fs: FlatFileSystem,
    input: R,
    out: W,
    err: E,
}

impl<R: BufRead, W: Write, E: Write> Shell<R, W, E> {
    pub fn new(fs: FlatFileSystem, input: R, out: W, err: E) -> Self {
        Self { fs, input, out, err }
    }

    /// Read and execute commands until `exit` or the end of input, then shut down.
    pub fn run(mut self) -> flat_fs::Result<()> {
        let mut line = String::new();
        loop {
            write!(self.out, "% ")?;
            self.out.flush()?;
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                writeln!(self.out)?;
                break;
            }
            if self.execute(&line)? == Flow::Exit {
                break;
            }
        }
        self.fs.shutdown()
    }

    pub fn execute(&mut self, line: &str) -> io::Result<Flow> {
        match parse(line) {
            Command::Empty => {}
            Command::Import { external, internal } => {
                if let Err(err) = self.fs.import_file(external, internal) {
                    writeln!(
                        self.err,
                        "cannot import external file {} as {}: {}",
                        external, internal, err
                    )?;
                }
            }
            Command::Export { internal, external } => self.export(internal, external)?,
            Command::Rm(name) => {
                if let Err(err) = self.fs.remove(name) {
                    writeln!(self.err, "cannot remove {}: {}", name, err)?;
                }
            }
            Command::Ls => self.ls()?,
            Command::Quota => {
                let free = self.fs.free_space();
                writeln!(
                    self.out,
                    "free space: {} bytes, {} blocks",
                    free * BLOCK_SZ,
                    free
                )?;
            }
            Command::Fsck => {
                let found = self.fs.check();
                if found.is_empty() {
                    writeln!(self.out, "no inconsistency found")?;
                }
                for inconsistency in found {
                    writeln!(self.out, "{:?}", inconsistency)?;
                }
            }
            Command::Exit => return Ok(Flow::Exit),
            Command::Usage(usage) => writeln!(self.err, "usage: {}", usage)?,
            Command::Unknown(name) => {
                writeln!(self.err, "unknown command: {}", name)?;
                writeln!(self.err, "\ttry: {}", COMMANDS)?;
            }
        }
        Ok(Flow::Continue)
    }

    fn export(&mut self, internal: &str, external: &str) -> io::Result<()> {
        let input = &mut self.input;
        let out = &mut self.out;
        let result = self
            .fs
            .export_file(internal, external, |target| {
                ask_overwrite(&mut *input, &mut *out, target)
            });
        match result {
            Ok(ExportOutcome::Written(path)) => {
                debug!("exported {} to {}", internal, path.display());
                Ok(())
            }
            Ok(ExportOutcome::Aborted) => writeln!(self.out, "export aborted"),
            Err(err) => writeln!(
                self.err,
                "cannot export {} to external file {}: {}",
                internal, external, err
            ),
        }
    }

    fn ls(&mut self) -> io::Result<()> {
        match self.fs.list() {
            Listing::Empty => writeln!(self.out, "empty directory"),
            Listing::Files { entries, total } => {
                for info in entries {
                    writeln!(
                        self.out,
                        "{:<28}{:>10} B  {}",
                        info.name,
                        info.size,
                        format_time(info.modified)
                    )?;
                }
                writeln!(self.out, "{} file(s)", total)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flat_fs::FsOptions;
    use tempfile::TempDir;

    fn formatted(dir: &TempDir) -> FlatFileSystem {
        FlatFileSystem::format(
            (32 * BLOCK_SZ) as u64,
            dir.path().join("disk.img"),
            FsOptions::default(),
        )
        .expect("format")
    }

    /// Run `script` against `fs`, returning what went to stdout and stderr
    fn run_script(fs: FlatFileSystem, script: &str) -> (String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        Shell::new(fs, script.as_bytes(), &mut out, &mut err)
            .run()
            .expect("run");
        (
            String::from_utf8(out).expect("utf8"),
            String::from_utf8(err).expect("utf8"),
        )
    }

    #[test]
    fn commands_are_split_on_whitespace() {
        assert_eq!(
            parse("  import  a.txt   b \n"),
            Command::Import { external: "a.txt", internal: "b" }
        );
        assert_eq!(
            parse("export b out.txt"),
            Command::Export { internal: "b", external: "out.txt" }
        );
        assert_eq!(parse("rm b"), Command::Rm("b"));
        assert_eq!(parse("ls"), Command::Ls);
        assert_eq!(parse("quota"), Command::Quota);
        assert_eq!(parse("exit"), Command::Exit);
        assert_eq!(parse(" \t\n"), Command::Empty);
    }

    #[test]
    fn wrong_arity_yields_the_usage() {
        assert_eq!(parse("import a"), Command::Usage(IMPORT_USAGE));
        assert_eq!(parse("export a b c"), Command::Usage(EXPORT_USAGE));
        assert_eq!(parse("rm"), Command::Usage(RM_USAGE));
        assert_eq!(parse("mkdir x"), Command::Unknown("mkdir"));
    }

    #[test]
    fn timestamps_are_utc() {
        assert_eq!(format_time(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_time(86_400 + 61), "1970-01-02T00:01:01Z");
    }

    #[test]
    fn session_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let host = dir.path().join("hello.txt");
        std::fs::write(&host, b"hello, flat world").expect("write");
        let copy = dir.path().join("copy.txt");
        let script = format!(
            "import {} hello\nls\nquota\nexport hello {}\nrm hello\nls\nbogus\nimport onlyone\nexit\nls\n",
            host.display(),
            copy.display()
        );

        let (out, err) = run_script(formatted(&dir), &script);
        assert!(out.starts_with("% "));
        assert!(out.contains("hello"));
        assert!(out.contains("17 B"));
        assert!(out.contains("1 file(s)"));
        assert!(out.contains(&format!("free space: {} bytes, 22 blocks", 22 * BLOCK_SZ)));
        assert!(out.contains("empty directory"));
        assert!(err.contains("unknown command: bogus"));
        assert!(err.contains(COMMANDS));
        assert!(err.contains(&format!("usage: {}", IMPORT_USAGE)));
        assert_eq!(std::fs::read(&copy).expect("read"), b"hello, flat world");
        // nothing after exit runs
        assert_eq!(out.matches("empty directory").count(), 1);
    }

    #[test]
    fn failures_are_reported_and_the_loop_goes_on() {
        let dir = TempDir::new().expect("tempdir");
        let script = format!(
            "import {} x\nrm nothing\nexport nothing {}\nquota\n",
            dir.path().join("missing").display(),
            dir.path().join("out").display()
        );
        let (out, err) = run_script(formatted(&dir), &script);
        assert!(err.contains("cannot import external file"));
        assert!(err.contains("cannot remove nothing"));
        assert!(err.contains("cannot export nothing"));
        assert!(out.contains("free space"));
    }

    #[test]
    fn export_asks_before_overwriting() {
        let dir = TempDir::new().expect("tempdir");
        let host = dir.path().join("src");
        std::fs::write(&host, b"new").expect("write");
        let taken = dir.path().join("taken");
        std::fs::write(&taken, b"old").expect("write");
        let renamed = dir.path().join("renamed");
        let script = format!(
            "import {} f\nexport f {}\na\nexport f {}\nmaybe\nn\n{}\nexport f {}\ny\n",
            host.display(),
            taken.display(),
            taken.display(),
            renamed.display(),
            taken.display()
        );

        let (out, err) = run_script(formatted(&dir), &script);
        assert_eq!(err, "");
        assert!(out.contains("export aborted"));
        assert!(out.contains("overwrite? [y]es / [n]o, rename / [a]bort"));
        assert!(out.contains("new name: "));
        assert_eq!(std::fs::read(&renamed).expect("read"), b"new");
        assert_eq!(std::fs::read(&taken).expect("read"), b"new");
    }

    #[test]
    fn end_of_input_shuts_the_volume_down() {
        let dir = TempDir::new().expect("tempdir");
        let host = dir.path().join("src");
        std::fs::write(&host, b"kept").expect("write");
        run_script(formatted(&dir), &format!("import {} kept\n", host.display()));

        let fs = FlatFileSystem::open(dir.path().join("disk.img"), FsOptions::default())
            .expect("open");
        match fs.list() {
            Listing::Files { entries, .. } => assert_eq!(entries[0].name, "kept"),
            Listing::Empty => panic!("import was lost"),
        }
    }
}
