//! Tests for repository selection and summarizer configuration.

mod support;

use std::io::Write;
use std::str::FromStr;

use glycemic_summary::db::{
    load_config, RepositoryError, RepositoryFactory, RepositoryType, SummaryRepository,
};
use glycemic_summary::services::SummarizerConfig;

#[test]
fn test_repository_type_from_str() {
    assert_eq!(RepositoryType::from_str("local").unwrap(), RepositoryType::Local);
    assert_eq!(RepositoryType::from_str(" Local ").unwrap(), RepositoryType::Local);

    let err = RepositoryType::from_str("postgres").unwrap_err();
    assert!(err.contains("Unknown repository type"));
}

#[test]
fn test_repository_type_from_env() {
    support::with_scoped_env(&[("REPOSITORY_TYPE", None)], || {
        assert_eq!(RepositoryType::from_env().unwrap(), RepositoryType::Local);
    });
    support::with_scoped_env(&[("REPOSITORY_TYPE", Some("memory"))], || {
        assert_eq!(RepositoryType::from_env().unwrap(), RepositoryType::Local);
    });
    support::with_scoped_env(&[("REPOSITORY_TYPE", Some("mongo"))], || {
        let err = RepositoryType::from_env().unwrap_err();
        assert!(matches!(err, RepositoryError::ConfigurationError { .. }));
        assert!(RepositoryFactory::from_env().is_err());
    });
}

#[test]
fn test_summarizer_config_from_env() {
    support::with_scoped_env(
        &[
            ("SUMMARY_DATA_BATCH_SIZE", Some("500")),
            ("SUMMARY_REALTIME_LATENCY_HOURS", None),
            ("SUMMARY_SWEEP_CONCURRENCY", Some("16")),
        ],
        || {
            let config = SummarizerConfig::from_env().unwrap();
            assert_eq!(config.data_batch_size, 500);
            assert_eq!(config.sweep_concurrency, 16);
            assert_eq!(
                config.realtime_latency_hours,
                SummarizerConfig::default().realtime_latency_hours
            );
        },
    );

    support::with_scoped_env(&[("SUMMARY_SWEEP_CONCURRENCY", Some("0"))], || {
        assert!(SummarizerConfig::from_env().is_err());
    });
}

#[test]
fn test_load_config_applies_env_over_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[repository]\ntype = \"local\"\n\n[summary]\ndata_batch_size = 50\nrealtime_latency_hours = 6"
    )
    .unwrap();

    support::with_scoped_env(
        &[
            ("SUMMARY_DATA_BATCH_SIZE", Some("75")),
            ("SUMMARY_REALTIME_LATENCY_HOURS", None),
            ("SUMMARY_SWEEP_CONCURRENCY", None),
        ],
        || {
            let (config, summarizer) = load_config(Some(file.path())).unwrap();
            assert_eq!(config.repository_type().unwrap(), RepositoryType::Local);
            assert_eq!(summarizer.data_batch_size, 75);
            assert_eq!(summarizer.realtime_latency_hours, 6);
        },
    );
}

#[tokio::test]
async fn test_factory_builds_working_repository() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[repository]\ntype = \"local\"").unwrap();

    let repo = RepositoryFactory::from_config_file(file.path()).unwrap();
    assert!(repo.health_check().await.unwrap());
}
