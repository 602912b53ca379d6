mod logging;
mod shell;

use std::env;
use std::io;
use std::process;

use clap::{App, Arg, ArgGroup, ArgMatches};
use flat_fs::{FlatFileSystem, FsOptions};

use crate::shell::Shell;

/// Disk size in bytes, with an optional K or M suffix
fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let (digits, unit) = match text.char_indices().last()? {
        (i, 'K') | (i, 'k') => (&text[..i], 1024),
        (i, 'M') | (i, 'm') => (&text[..i], 1024 * 1024),
        _ => (text, 1),
    };
    digits.parse::<u64>().ok()?.checked_mul(unit)
}

fn open_volume(matches: &ArgMatches, options: FsOptions) -> Result<FlatFileSystem, String> {
    if let Some(mut values) = matches.values_of("mkfs") {
        let (size, path) = match (values.next(), values.next()) {
            (Some(size), Some(path)) => (size, path),
            _ => return Err("--mkfs takes a size and a path".into()),
        };
        let bytes = parse_size(size).ok_or_else(|| format!("invalid disk size {}", size))?;
        FlatFileSystem::format(bytes, path, options)
            .map_err(|err| format!("unable to format {}: {}", path, err))
    } else if let Some(path) = matches.value_of("mount") {
        FlatFileSystem::open(path, options).map_err(|err| format!("unable to mount {}: {}", path, err))
    } else {
        Err("either --mkfs or --mount is required".into())
    }
}

fn main() {
    let matches = App::new("flat-fs")
        .about("A single-directory file system in a virtual disk file")
        .arg(
            Arg::with_name("mkfs")
                .long("mkfs")
                .takes_value(true)
                .number_of_values(2)
                .value_names(&["SIZE", "PATH"])
                .help("Format a new virtual disk of SIZE bytes (K and M suffixes allowed)"),
        )
        .arg(
            Arg::with_name("mount")
                .long("mount")
                .takes_value(true)
                .value_name("PATH")
                .help("Mount an existing virtual disk"),
        )
        .group(
            ArgGroup::with_name("volume")
                .args(&["mkfs", "mount"])
                .required(true),
        )
        .arg(
            Arg::with_name("lenient")
                .long("lenient")
                .help("Log failed inode writes and carry on instead of failing"),
        )
        .arg(
            Arg::with_name("log")
                .long("log")
                .takes_value(true)
                .value_name("LEVEL")
                .possible_values(&["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
                .case_insensitive(true)
                .help("Log level, overrides the LOG environment variable"),
        )
        .get_matches();

    let level = matches
        .value_of("log")
        .map(str::to_string)
        .or_else(|| env::var("LOG").ok());
    logging::init(logging::level_filter(level.as_deref()));

    let options = if matches.is_present("lenient") {
        FsOptions::lenient()
    } else {
        FsOptions::default()
    };
    let fs = match open_volume(&matches, options) {
        Ok(fs) => fs,
        Err(msg) => {
            eprintln!("{}", msg);
            process::exit(1);
        }
    };
    eprintln!("file system ready");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let shell = Shell::new(fs, stdin.lock(), stdout.lock(), io::stderr());
    if let Err(err) = shell.run() {
        eprintln!("{}", err);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_take_binary_suffixes() {
        assert_eq!(parse_size("40960"), Some(40960));
        assert_eq!(parse_size("64K"), Some(64 * 1024));
        assert_eq!(parse_size("1m"), Some(1024 * 1024));
    }

    #[test]
    fn malformed_sizes_are_rejected() {
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("K"), None);
        assert_eq!(parse_size("12x"), None);
        assert_eq!(parse_size("-4096"), None);
    }

    #[test]
    fn mkfs_and_mount_reach_the_same_volume() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("disk.img");
        let path = path.to_str().expect("utf8 path");

        let app = || {
            App::new("flat-fs")
                .arg(Arg::with_name("mkfs").long("mkfs").number_of_values(2).takes_value(true))
                .arg(Arg::with_name("mount").long("mount").takes_value(true))
        };
        let matches = app().get_matches_from(vec!["flat-fs", "--mkfs", "64K", path]);
        let fs = open_volume(&matches, FsOptions::default()).expect("format");
        assert_eq!(fs.super_block().total_blocks, 16);
        fs.shutdown().expect("shutdown");

        let matches = app().get_matches_from(vec!["flat-fs", "--mount", path]);
        let fs = open_volume(&matches, FsOptions::default()).expect("mount");
        assert_eq!(fs.free_space(), 16 - flat_fs::config::DATA_START);

        let matches = app().get_matches_from(vec!["flat-fs", "--mkfs", "1K", path]);
        assert!(open_volume(&matches, FsOptions::default()).is_err());
    }
}
