// Configuration parsing tests
// Run with: cargo test --test config

use shm_render::config::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn test_defaults_without_variables() {
    let config = RenderConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(config.python, PathBuf::from("python3"));
    assert_eq!(config.command_timeout, None);
    assert_eq!(config.renderer_module, "shadertoyinterop");
    assert_eq!(config.renderer_class, "ShadertoyRenderer");
    assert_eq!(config.credential_env, "SHADERTOY_KEY");
    assert!(!config.install_packages);
}

#[test]
fn test_variables_override_defaults() {
    let config = RenderConfig::from_lookup(lookup(&[
        (ENV_PYTHON, "/opt/py/bin/python"),
        (ENV_TIMEOUT_MS, "1500"),
        (ENV_CLOSE_GRACE_MS, "250"),
        (ENV_RENDERER_MODULE, "fake.renderer"),
        (ENV_RENDERER_CLASS, "Fake"),
        (ENV_INSTALL_PACKAGES, "yes"),
    ]))
    .unwrap();

    println!("Parsed config: {:#?}", config);
    assert_eq!(config.python, PathBuf::from("/opt/py/bin/python"));
    assert_eq!(config.command_timeout, Some(Duration::from_millis(1500)));
    assert_eq!(config.close_grace, Duration::from_millis(250));
    assert_eq!(config.renderer_module, "fake.renderer");
    assert_eq!(config.renderer_class, "Fake");
    assert!(config.install_packages);
}

#[test]
fn test_zero_timeout_means_unbounded() {
    let config = RenderConfig::from_lookup(lookup(&[(ENV_TIMEOUT_MS, "0")])).unwrap();
    assert_eq!(config.command_timeout, None);
}

#[test]
fn test_blank_values_are_ignored() {
    let config = RenderConfig::from_lookup(lookup(&[(ENV_PYTHON, "  ")])).unwrap();
    assert_eq!(config.python, PathBuf::from("python3"));
}

#[test]
fn test_rejects_bad_values() {
    assert!(RenderConfig::from_lookup(lookup(&[(ENV_TIMEOUT_MS, "soon")])).is_err());
    assert!(RenderConfig::from_lookup(lookup(&[(ENV_INSTALL_PACKAGES, "maybe")])).is_err());
    assert!(RenderConfig::from_lookup(lookup(&[(ENV_RENDERER_CLASS, "Bad Name")])).is_err());
    assert!(RenderConfig::from_lookup(lookup(&[(ENV_RENDERER_MODULE, "os;x")])).is_err());
    assert!(RenderConfig::from_lookup(lookup(&[(ENV_CREDENTIAL_ENV, "1KEY")])).is_err());
}

#[test]
fn test_builder_chain() {
    let config = RenderConfig::new()
        .with_python("/usr/bin/python3")
        .with_command_timeout(Some(Duration::from_secs(5)))
        .with_renderer("fakerenderer", "FakeRenderer")
        .with_extra_python_path("/tmp/modules");

    assert!(config.validate().is_ok());
    assert_eq!(config.extra_python_path, vec![PathBuf::from("/tmp/modules")]);
    assert_eq!(config.renderer_class, "FakeRenderer");
}
