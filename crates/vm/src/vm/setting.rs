/// Search path for script modules, `?` stands for the module name.
pub const DEFAULT_PATH: &str = "./?.lua;./?/init.lua";
/// Search path for native modules. Kept for scripts that inspect or forward
/// it; native modules themselves are not loaded.
pub const DEFAULT_CPATH: &str = "./?.so";
/// Directory separator, path separator, name placeholder, executable
/// directory marker and ignore marker, one per line.
pub const DEFAULT_CONFIG: &str = "/\n;\n?\n!\n-\n";

/// User-configurable settings for the vm.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Settings {
    /// `package.path`
    pub path: String,

    /// `package.cpath`
    pub cpath: String,

    /// `package.config`
    pub config: String,

    /// The global `arg` table: script name at index 0, then its arguments.
    pub argv: Vec<String>,

    /// -v, log verbosity requested on the command line
    pub verbose: u8,

    /// -q
    pub quiet: bool,

    /// -i
    pub inspect: bool,
}

impl Settings {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_cpath(mut self, cpath: impl Into<String>) -> Self {
        self.cpath = cpath.into();
        self
    }

    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = config.into();
        self
    }

    pub fn with_argv(mut self, argv: Vec<String>) -> Self {
        self.argv = argv;
        self
    }
}

/// Sensible default settings.
impl Default for Settings {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_owned(),
            cpath: DEFAULT_CPATH.to_owned(),
            config: DEFAULT_CONFIG.to_owned(),
            argv: vec![],
            verbose: 0,
            quiet: false,
            inspect: false,
        }
    }
}

/// Expand a search path taken from the environment: `;;` stands for the
/// default path.
pub fn expand_search_path(value: &str, default: &str) -> String {
    match value.split_once(";;") {
        Some((before, after)) => {
            let mut expanded = String::new();
            for part in [before, default, after] {
                if part.is_empty() {
                    continue;
                }
                if !expanded.is_empty() {
                    expanded.push(';');
                }
                expanded.push_str(part);
            }
            expanded
        }
        None => value.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_search_path() {
        assert_eq!(expand_search_path("lib/?.lua", DEFAULT_PATH), "lib/?.lua");
        assert_eq!(
            expand_search_path("lib/?.lua;;", DEFAULT_PATH),
            "lib/?.lua;./?.lua;./?/init.lua"
        );
        assert_eq!(expand_search_path(";;", "a;b"), "a;b");
    }
}
