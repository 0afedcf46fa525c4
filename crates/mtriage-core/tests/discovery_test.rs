//! Integration tests for analyser discovery, scaffolding and run files

use mtriage_core::analysers::Identity;
use mtriage_core::{
    create_analyser, load_elements, BindingTable, Composer, CompositionError, DiskStore,
    ElementData, Etype, Orchestrator, Registry, RegistryError, RunConfig, ScaffoldError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn bundled_analysers() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../analysers")
}

#[test]
fn test_bundled_analysers_load() {
    let discovery = Registry::discover(&[bundled_analysers()], &BindingTable::builtin()).unwrap();
    assert!(discovery.failures.is_empty(), "{:?}", discovery.failures);
    assert_eq!(
        discovery.registry.names(),
        vec!["Identity", "LabelFilter", "MediaMeta"]
    );

    let filter = discovery.registry.get("LabelFilter").unwrap();
    assert_eq!(filter.in_etype, Etype::CvJson);
    assert!(filter.schema.contains("labels"));
    assert!(!filter.schema.get("labels").unwrap().required);
}

#[test]
fn test_scaffolded_analyser_is_discovered() {
    let root = tempfile::tempdir().unwrap();
    create_analyser(root.path(), "fooBar", "does foo").unwrap();

    let refused = create_analyser(root.path(), "fooBar", "again").unwrap_err();
    assert!(matches!(refused, ScaffoldError::AlreadyExists(_)));
    for bad in ["foo_bar", "FOOBAR", "foobar"] {
        assert!(matches!(
            create_analyser(root.path(), bad, "x"),
            Err(ScaffoldError::InvalidName(_))
        ));
        assert!(!root.path().join(bad).exists());
    }

    let bindings = BindingTable::new().with("fooBar", Arc::new(Identity));
    let discovery = Registry::discover(&[root.path().to_path_buf()], &bindings).unwrap();
    let descriptor = discovery.registry.get("fooBar").unwrap();
    assert_eq!(descriptor.desc, "does foo");
    assert_eq!(descriptor.dir.as_deref(), Some(root.path().join("fooBar").as_path()));

    // The generated schema fills its example default
    let spec = Composer::new(&discovery.registry)
        .compose("scaffold", &[mtriage_core::StepConfig::new("fooBar")])
        .unwrap();
    assert_eq!(spec.steps[0].config.get_str("example"), Some("hello"));
}

#[test]
fn test_scaffold_without_binding_fails_closed() {
    let root = tempfile::tempdir().unwrap();
    create_analyser(root.path(), "Unbound", "no code yet").unwrap();
    let err = Registry::discover(&[root.path().to_path_buf()], &BindingTable::builtin()).unwrap_err();
    assert!(matches!(err, RegistryError::NothingDiscovered { failed: 1 }));
}

#[tokio::test]
async fn test_run_file_end_to_end() {
    let work = tempfile::tempdir().unwrap();
    let media = work.path().join("media");
    std::fs::create_dir_all(&media).unwrap();
    std::fs::write(media.join("b.png"), [0u8; 4]).unwrap();
    std::fs::write(media.join("a.jpg"), [0u8; 7]).unwrap();
    std::fs::write(media.join(".hidden"), b"skip").unwrap();

    let run_file = work.path().join("run.yaml");
    std::fs::write(
        &run_file,
        format!(
            "name: photos\nfolder: media\nanalysers: [{}]\nmax_parallel: 2\nsteps:\n  - analyser: Identity\n  - analyser: MediaMeta\n    config:\n      include_path: true\n",
            bundled_analysers().display()
        ),
    )
    .unwrap();

    let config = RunConfig::load(&run_file).unwrap();
    let discovery =
        Registry::discover(&config.analyser_roots(), &BindingTable::builtin()).unwrap();
    let spec = Composer::new(&discovery.registry)
        .compose(&config.name, &config.steps)
        .unwrap();
    let inputs = load_elements(&config.input_dir()).unwrap();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0].id, "a");
    assert_eq!(inputs[0].etype, Etype::Image);

    let store = Arc::new(DiskStore::new(work.path().join("cache")));
    let orchestrator = Orchestrator::new(config.context(), store);
    let report = orchestrator.run(&spec, inputs).await.unwrap();
    assert_eq!(report.completed(), 2);

    let outputs: Vec<_> = report.outputs().collect();
    assert_eq!(outputs[0].etype, Etype::Json);
    let ElementData::Json(meta) = &outputs[0].payload else {
        panic!("expected JSON output");
    };
    assert_eq!(meta["bytes"], 7);
    assert_eq!(meta["extension"], "jpg");
    assert!(meta["path"].as_str().unwrap().ends_with("a.jpg"));
}

#[test]
fn test_run_file_type_mismatch() {
    let discovery = Registry::discover(&[bundled_analysers()], &BindingTable::builtin()).unwrap();
    let config = RunConfig::from_yaml_str(
        "name: bad\nfolder: media\nsteps:\n  - analyser: MediaMeta\n  - analyser: LabelFilter\n",
        ".",
    )
    .unwrap();
    let err = Composer::new(&discovery.registry)
        .compose(&config.name, &config.steps)
        .unwrap_err();
    assert_eq!(
        err,
        CompositionError::TypeMismatch {
            step: 1,
            analyser: "LabelFilter".to_string(),
            expected: Etype::CvJson,
            got: Etype::Json,
        }
    );
}
