use envconfig::Envconfig;
use lazy_static::lazy_static;

#[derive(Debug, Envconfig)]
pub struct Config {
    #[envconfig(from = "ARBOR_LOG_LEVEL", default = "info")]
    pub log_level: String,
    /// Number of decoded baskets kept per opened file. Zero disables the cache.
    #[envconfig(from = "ARBOR_BASKET_CACHE_SIZE", default = "256")]
    pub basket_cache_size: usize,
    /// Upper bound on subdirectory nesting followed while indexing a file.
    #[envconfig(from = "ARBOR_MAX_DIRECTORY_DEPTH", default = "64")]
    pub max_directory_depth: usize,
    /// Rows per record batch handed to the parquet writer.
    #[envconfig(from = "ARBOR_EXPORT_BATCH_SIZE", default = "65536")]
    pub export_batch_size: usize,
    #[envconfig(from = "ARBOR_EXPORT_COMPRESSION", default = "high-ratio")]
    pub export_compression: String,
}

impl Config {
    pub fn init() -> Config {
        Config::init_from_env().expect("Failed to load config")
    }
}

lazy_static! {
    pub static ref CONFIG: Config = Config::init();
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_apply_without_environment() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.basket_cache_size, 256);
        assert_eq!(config.max_directory_depth, 64);
        assert_eq!(config.export_batch_size, 65536);
        assert_eq!(config.export_compression, "high-ratio");
    }

    #[test]
    fn values_are_read_from_the_environment_map() {
        let mut env = HashMap::new();
        env.insert("ARBOR_BASKET_CACHE_SIZE".to_string(), "0".to_string());
        env.insert("ARBOR_EXPORT_COMPRESSION".to_string(), "fast".to_string());
        let config = Config::init_from_hashmap(&env).unwrap();
        assert_eq!(config.basket_cache_size, 0);
        assert_eq!(config.export_compression, "fast");
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let mut env = HashMap::new();
        env.insert("ARBOR_EXPORT_BATCH_SIZE".to_string(), "lots".to_string());
        assert!(Config::init_from_hashmap(&env).is_err());
    }
}
