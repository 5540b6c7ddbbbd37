use indexmap::IndexMap;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Key/value attributes of a single process block, in file order.
pub type Attributes = IndexMap<String, String>;

/// Whole configuration file: one attribute block per process name.
///
/// ```yaml
/// RPI_OUTPUTRELAY:
///   ConsumerQueue1: "IQ_RPI_OUTPUTLIGHTS"
///   Relay00: "(0,0);Garage door;RPI_INPUTBUTTON_0_1_PRESSED|PULSE"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub processes: IndexMap<String, Attributes>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(filename: P) -> anyhow::Result<Self> {
        let handle = File::open(filename)?;
        let data: Config = serde_yaml::from_reader(handle)?;

        Ok(data)
    }

    pub fn parse(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Attribute block of a process. Block names are matched upper-case.
    pub fn block(&self, process_name: &str) -> Option<&Attributes> {
        self.processes.get(&process_name.to_uppercase())
    }
}

/// Supplies process attributes on startup and on every refresh.
pub trait AttributeSource {
    fn attributes(&self, process_name: &str) -> anyhow::Result<Attributes>;
}

/// Reads the YAML file anew on each call so refreshes see edits.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl AttributeSource for FileSource {
    fn attributes(&self, process_name: &str) -> anyhow::Result<Attributes> {
        let config = Config::from_file(&self.path)?;
        debug!("Read configuration from {}", self.path.display());
        Ok(block_or_empty(&config, process_name))
    }
}

impl AttributeSource for Config {
    fn attributes(&self, process_name: &str) -> anyhow::Result<Attributes> {
        Ok(block_or_empty(self, process_name))
    }
}

fn block_or_empty(config: &Config, process_name: &str) -> Attributes {
    match config.block(process_name) {
        Some(block) => block.clone(),
        None => {
            warn!("No configuration block for process {}", process_name);
            Attributes::new()
        }
    }
}

/// Entries whose key is `prefix` followed by digits only, in declaration order.
/// `Relay01` matches `Relay`; `RelayTimer01` does not.
pub fn numbered_entries<'a>(
    attributes: &'a Attributes,
    prefix: &'a str,
) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    attributes.iter().filter_map(move |(key, value)| {
        let rest = key.strip_prefix(prefix)?;
        if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
            Some((key.as_str(), value.as_str()))
        } else {
            None
        }
    })
}

/// Resolve a queue reference (eg. `ConsumerQueue1`) to queue names.
/// The referenced value may list several names separated by whitespace.
pub fn resolve_queues(attributes: &Attributes, reference: &str) -> Option<Vec<String>> {
    let value = attributes.get(reference.trim())?;
    let queues: Vec<String> = value.split_whitespace().map(str::to_string).collect();
    if queues.is_empty() {
        None
    } else {
        Some(queues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
RPI_OUTPUTRELAY:
  ConsumerQueue1: "IQ_A IQ_B"
  Relay00: "(0,0);Garage;T1|PULSE"
  RelayTimer00: "(0,0);Timer;5;0"
  Relay01: "(0,1);Gate;T2|TOGGLE"
RPI_INPUTBUTTON:
  Button00: "(0,0);Hall;ConsumerQueue1"
"#;

    #[test]
    fn loads_blocks_in_file_order() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        let keys: Vec<&String> = config.block("rpi_outputrelay").unwrap().keys().collect();
        assert_eq!(
            keys,
            ["ConsumerQueue1", "Relay00", "RelayTimer00", "Relay01"]
        );
    }

    #[test]
    fn file_source_rereads_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let source = FileSource::new(file.path());
        assert_eq!(source.attributes("RPI_INPUTBUTTON").unwrap().len(), 1);

        std::fs::write(file.path(), "RPI_INPUTBUTTON: {}\n").unwrap();
        assert!(source.attributes("RPI_INPUTBUTTON").unwrap().is_empty());
    }

    #[test]
    fn missing_block_is_empty() {
        let config = Config::parse(SAMPLE).unwrap();
        assert!(config.attributes("RPI_OTHER").unwrap().is_empty());
    }

    #[test]
    fn numbered_entries_skip_longer_prefixes() {
        let config = Config::parse(SAMPLE).unwrap();
        let block = config.block("RPI_OUTPUTRELAY").unwrap();
        let keys: Vec<&str> = numbered_entries(block, "Relay").map(|(k, _)| k).collect();
        assert_eq!(keys, ["Relay00", "Relay01"]);
        let timers: Vec<&str> = numbered_entries(block, "RelayTimer").map(|(k, _)| k).collect();
        assert_eq!(timers, ["RelayTimer00"]);
    }

    #[test]
    fn queue_references_resolve_to_names() {
        let config = Config::parse(SAMPLE).unwrap();
        let block = config.block("RPI_OUTPUTRELAY").unwrap();
        assert_eq!(
            resolve_queues(block, " ConsumerQueue1 "),
            Some(vec!["IQ_A".to_string(), "IQ_B".to_string()])
        );
        assert_eq!(resolve_queues(block, "ConsumerQueue9"), None);
    }
}
