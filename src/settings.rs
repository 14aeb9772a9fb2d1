use lexopt::prelude::*;
use lunapr_vm::{DEFAULT_CPATH, DEFAULT_PATH, Settings, expand_search_path};
use std::{env, ffi::OsString};

pub const USAGE: &str = "\
usage: lunapr [options] [script [args]]
Available options are:
  -e chunk  execute string 'chunk'
  -i        enter interactive mode after executing 'script'
  -v        increase log verbosity (repeatable)
  -q        do not print the banner in interactive mode
  -h        show this help and exit
  -V        show version information and exit
  --        stop handling options
  -         execute stdin and stop handling options
";

/// What the command line asks the binary to do.
#[derive(Debug, PartialEq)]
pub enum RunMode {
    Help,
    Version,
    Run(RunOpts),
}

#[derive(Debug, Default, PartialEq)]
pub struct RunOpts {
    /// `-e` chunks, in command line order.
    pub chunks: Vec<String>,
    /// Script path, `-` for stdin.
    pub script: Option<String>,
}

pub fn parse_opts() -> Result<(Settings, RunMode), lexopt::Error> {
    let (mut settings, mode) = parse_args(env::args_os().skip(1))?;
    apply_environment(&mut settings, |name| env::var(name).ok());
    Ok((settings, mode))
}

fn parse_args(
    args: impl IntoIterator<Item = impl Into<OsString>>,
) -> Result<(Settings, RunMode), lexopt::Error> {
    let mut settings = Settings::default();
    let mut opts = RunOpts::default();
    let mut parser = lexopt::Parser::from_args(args);
    while let Some(arg) = parser.next()? {
        match arg {
            Short('e') => opts.chunks.push(parser.value()?.string()?),
            Short('i') => settings.inspect = true,
            Short('v') => settings.verbose = settings.verbose.saturating_add(1),
            Short('q') => settings.quiet = true,
            Short('h') | Long("help") => return Ok((settings, RunMode::Help)),
            Short('V') | Long("version") => return Ok((settings, RunMode::Version)),
            Value(script) => {
                let script = script.string()?;
                let mut argv = vec![script.clone()];
                for arg in parser.raw_args()? {
                    argv.push(arg.string()?);
                }
                settings = settings.with_argv(argv);
                opts.script = Some(script);
                break;
            }
            _ => return Err(arg.unexpected()),
        }
    }
    Ok((settings, RunMode::Run(opts)))
}

/// `LUNAPR_PATH` and `LUNAPR_CPATH` replace the default search paths; a `;;`
/// inside them stands for the default.
fn apply_environment(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(path) = var("LUNAPR_PATH") {
        settings.path = expand_search_path(&path, DEFAULT_PATH);
    }
    if let Some(cpath) = var("LUNAPR_CPATH") {
        settings.cpath = expand_search_path(&cpath, DEFAULT_CPATH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> (Settings, RunMode) {
        parse_args(args.iter().copied()).unwrap()
    }

    #[test]
    fn test_script_and_arguments() {
        let (settings, mode) = parse(&["-v", "-v", "-e", "x = 1", "main.lua", "-i", "two"]);
        assert_eq!(settings.verbose, 2);
        assert!(!settings.inspect);
        assert_eq!(settings.argv, ["main.lua", "-i", "two"]);
        assert_eq!(
            mode,
            RunMode::Run(RunOpts {
                chunks: vec!["x = 1".to_owned()],
                script: Some("main.lua".to_owned()),
            })
        );
    }

    #[test]
    fn test_flags_without_script() {
        let (settings, mode) = parse(&["-i", "-q"]);
        assert!(settings.inspect && settings.quiet);
        assert!(settings.argv.is_empty());
        assert_eq!(mode, RunMode::Run(RunOpts::default()));
        assert_eq!(parse(&["-q", "-V"]).1, RunMode::Version);
        assert_eq!(parse(&["--help"]).1, RunMode::Help);
    }

    #[test]
    fn test_stdin_and_double_dash() {
        let (settings, mode) = parse(&["-", "a"]);
        assert_eq!(settings.argv, ["-", "a"]);
        assert!(matches!(mode, RunMode::Run(RunOpts { script: Some(s), .. }) if s == "-"));
        let (settings, _) = parse(&["--", "-weird.lua"]);
        assert_eq!(settings.argv, ["-weird.lua"]);
    }

    #[test]
    fn test_bad_options() {
        assert!(parse_args(["-x"]).is_err());
        assert!(parse_args(["-e"]).is_err());
    }

    #[test]
    fn test_environment_paths() {
        let mut settings = Settings::default();
        apply_environment(&mut settings, |name| match name {
            "LUNAPR_PATH" => Some("lib/?.lua;;".to_owned()),
            _ => None,
        });
        assert_eq!(settings.path, format!("lib/?.lua;{DEFAULT_PATH}"));
        assert_eq!(settings.cpath, DEFAULT_CPATH);
    }
}
