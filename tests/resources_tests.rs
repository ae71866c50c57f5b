use std::io::Write;

use jobrelay::resources::{ResourceError, ResourceOverride, ResourceProfiles, ResourceRequirements};

const PROFILES: &str = r#"{
  "defaultResources": { "cpuMillis": 1000, "memoryMiB": 512, "maxRunDurationSeconds": 3600 },
  "resourceProfiles": {
    "small": { "cpuMillis": 250, "memoryMiB": 256, "maxRunDurationSeconds": 600 },
    "large": { "cpuMillis": 4000, "memoryMiB": 8192, "maxRunDurationSeconds": 86400 }
  }
}"#;

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_load_profiles_from_file() {
    let file = write_temp(PROFILES);
    let profiles = ResourceProfiles::load(file.path()).await.unwrap();

    assert_eq!(
        profiles.profile("large"),
        Some(ResourceRequirements {
            cpu_millis: 4000,
            memory_mib: 8192,
            max_run_duration_seconds: 86400,
        })
    );
    assert_eq!(profiles.default_resources(), ResourceRequirements::default());
}

#[tokio::test]
async fn test_small_profile_with_cpu_override() {
    let file = write_temp(PROFILES);
    let profiles = ResourceProfiles::load(file.path()).await.unwrap();

    let resolved = profiles.resolve(
        Some("small"),
        Some(&ResourceOverride {
            cpu_millis: Some(500),
            ..Default::default()
        }),
    );
    assert_eq!(
        resolved,
        ResourceRequirements {
            cpu_millis: 500,
            memory_mib: 256,
            max_run_duration_seconds: 600,
        }
    );
}

#[tokio::test]
async fn test_missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");

    match ResourceProfiles::load(&path).await {
        Err(ResourceError::Read { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected read error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_file_is_a_parse_error() {
    let file = write_temp("{ \"defaultResources\": ");
    assert!(matches!(
        ResourceProfiles::load(file.path()).await,
        Err(ResourceError::Parse(_))
    ));
}

#[tokio::test]
async fn test_file_without_default_is_rejected() {
    let file = write_temp(r#"{ "resourceProfiles": {} }"#);
    assert!(matches!(
        ResourceProfiles::load(file.path()).await,
        Err(ResourceError::MissingDefault)
    ));
}
