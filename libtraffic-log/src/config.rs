use crate::error::Error;
use std::io;

/// Default path of the shared log file
pub const DEFAULT_LOG_FILE: &str = "server.log";
/// Default size of the payload and read buffers (text keeps one byte less)
pub const DEFAULT_BUFFER_SIZE: usize = 2048;
/// Default number of pending connections on the listening socket
pub const DEFAULT_BACKLOG: usize = 3;

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

fn ensure_table(item: &mut toml::Value) -> &mut toml::map::Map<String, toml::Value> {
    if !item.is_table() {
        *item = empty_table();
    }
    match item {
        toml::Value::Table(table) => table,
        _ => unreachable!(),
    }
}

pub struct Config {
    value: toml::Value,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            value: empty_table(),
        }
    }
}

impl Config {
    /// Get an entry by path. If the input argument contains dots, the path is split
    /// into keys, each key being requested recursively.
    pub fn get<T: AsRef<str>>(&self, k: T) -> Option<&str> {
        self.lookup(k)?.as_str()
    }

    /// Get an entry of type integer by path
    pub fn get_usize<T: AsRef<str>>(&self, k: T) -> Option<usize> {
        self.lookup(k)?
            .as_integer()
            .and_then(|i| if i >= 0 { Some(i as usize) } else { None })
    }

    /// Get an entry of type boolean by path
    pub fn get_bool<T: AsRef<str>>(&self, k: T) -> Option<bool> {
        self.lookup(k)?.as_bool()
    }

    fn lookup<T: AsRef<str>>(&self, k: T) -> Option<&toml::Value> {
        let mut item = &self.value;
        for key in k.as_ref().split('.') {
            item = item.get(key)?;
        }
        Some(item)
    }

    /// Set an entry by path, creating intermediate tables. Used to override
    /// configuration values from command-line arguments.
    pub fn set<K: AsRef<str>, T: Into<toml::Value>>(&mut self, k: K, v: T) {
        let keys: Vec<&str> = k.as_ref().split('.').collect();
        let Some((last, parents)) = keys.split_last() else {
            return;
        };
        let mut item = &mut self.value;
        for key in parents {
            item = ensure_table(item)
                .entry(key.to_string())
                .or_insert(empty_table());
        }
        ensure_table(item).insert(last.to_string(), v.into());
    }

    /// Load configuration from input object. If keys are already present, they are overwritten
    pub fn load_config<R: io::Read>(&mut self, mut config: R) -> Result<(), io::Error> {
        let mut s = String::new();
        config.read_to_string(&mut s)?;
        match toml::from_str::<toml::Table>(&s) {
            Ok(table) => {
                self.value = toml::Value::Table(table);
                Ok(())
            }
            Err(e) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Load configuration failed: {e}"),
            )),
        }
    }
}

/// Path of the log file shared by the capture and server paths
pub fn get_log_file(config: &Config) -> &str {
    config.get("log_file").unwrap_or(DEFAULT_LOG_FILE)
}

/// Size of the bounded text buffer. Must leave room for at least one byte of text.
pub fn get_buffer_size(config: &Config) -> Result<usize, Error> {
    match config.get_usize("buffer_size").unwrap_or(DEFAULT_BUFFER_SIZE) {
        n if n < 2 => Err(Error::Config(format!("buffer_size must be at least 2 (got {n})"))),
        n => Ok(n),
    }
}
