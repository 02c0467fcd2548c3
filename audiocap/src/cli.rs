use std::path::PathBuf;

use clap::{builder::ValueParser, value_parser, Arg, Command};

pub const DEFAULT_PREFIX: &str = "recording";
pub const DEFAULT_MERGED_SIZE: &str = "24m";
pub const DEFAULT_SPLIT_SIZE: &str = "8m";

/// Parse a human-friendly byte size into a count.
///
/// A plain number is taken as bytes; the suffixes `k`, `m`, and `g`
/// (case-insensitive) multiply by 1024, 1024² and 1024³ respectively, such as
/// `"8m"` or `"200K"`. The parser requires the size to be greater than zero.
pub fn parse_size(value: &str) -> Result<u64, String> {
    let input = value.trim();
    if input.is_empty() {
        return Err("size cannot be empty".into());
    }

    let (digits, factor) = match input.chars().last() {
        Some('k') | Some('K') => (&input[..input.len() - 1], 1_024u64),
        Some('m') | Some('M') => (&input[..input.len() - 1], 1_024 * 1_024),
        Some('g') | Some('G') => (&input[..input.len() - 1], 1_024 * 1_024 * 1_024),
        _ => (input, 1),
    };

    let number = digits
        .parse::<u64>()
        .map_err(|_| format!("invalid size '{value}'"))?;
    let bytes = number
        .checked_mul(factor)
        .ok_or_else(|| "size is too large".to_owned())?;

    if bytes == 0 {
        return Err("size must be greater than zero".into());
    }
    Ok(bytes)
}

pub fn build_cli() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Repackage an audio file into size-capped merged and split recordings")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("OUTPUT_DIR")
                .help("Base directory; files are written to a subfolder named after the input")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("prefix")
                .short('p')
                .long("prefix")
                .value_name("PREFIX")
                .help("Prefix for the generated file names")
                .default_value(DEFAULT_PREFIX),
        )
        .arg(
            Arg::new("merged-size")
                .long("merged-size")
                .value_name("SIZE")
                .help("Byte budget for the merged file (e.g. 200k, 24m)")
                .default_value(DEFAULT_MERGED_SIZE)
                .value_parser(ValueParser::new(parse_size)),
        )
        .arg(
            Arg::new("split-size")
                .long("split-size")
                .value_name("SIZE")
                .help("Byte ceiling for each split partition (e.g. 100k, 8m)")
                .default_value(DEFAULT_SPLIT_SIZE)
                .value_parser(ValueParser::new(parse_size)),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .help("Output container")
                .value_parser(["wav", "mp3"])
                .default_value("mp3"),
        )
        .arg(
            Arg::new("bitrate")
                .short('b')
                .long("bitrate")
                .value_name("KBPS")
                .help("Constant bitrate for MP3 output")
                .default_value("128")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("file_path")
                .value_name("FILE_PATH")
                .help("Path to the input audio file")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_accepts_plain_bytes() {
        assert_eq!(parse_size("500").unwrap(), 500);
    }

    #[test]
    fn parse_size_supports_binary_suffixes() {
        assert_eq!(parse_size("200k").unwrap(), 200 * 1_024);
        assert_eq!(parse_size("8M").unwrap(), 8 * 1_024 * 1_024);
        assert_eq!(parse_size("2g").unwrap(), 2 * 1_024 * 1_024 * 1_024);
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("eight").is_err());
        assert!(parse_size("8x").is_err());
        assert!(parse_size("-1k").is_err());
    }

    #[test]
    fn parse_size_rejects_zero() {
        assert!(parse_size("0").is_err());
        assert!(parse_size("0m").is_err());
    }

    #[test]
    fn parse_size_rejects_overflow() {
        assert!(parse_size("99999999999999999999").is_err());
        assert!(parse_size("18446744073709551615g").is_err());
    }
}
