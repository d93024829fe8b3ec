// tests/canonical_identity.rs

use std::sync::Arc;

use serde_json::json;

use reprod::digest::{hash_bytes, parse_digest, parse_digests, DigestMap};
use reprod::errors::ReprodError;
use reprod::graph::canonical::{canonical_string, from_toml, to_canonical_value};
use reprod::graph::{canonical_bytes, canonical_id, BuildGraph, Input, Pipeline};
use reprod::storage::{MemoryStorage, Storage};
use reprod::types::HashAlgorithm;
use reprod_test_utils::builders::{add_file, add_shell, uid_of};

fn storage() -> Arc<dyn Storage> {
    Arc::new(MemoryStorage::new())
}

#[test]
fn canonical_form_sorts_keys_and_drops_whitespace() {
    let value = json!({
        "zeta": 1,
        "alpha": [true, null, "x"],
        "mid": { "b": 2.5, "a": "s" }
    });

    let bytes = canonical_bytes(&value).unwrap();
    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        r#"{"alpha":[true,null,"x"],"mid":{"a":"s","b":2.5},"zeta":1}"#
    );
}

#[test]
fn canonical_id_is_prefixed_digest_of_canonical_bytes() {
    let value = json!({ "type": "external", "location": "data/a.txt" });
    let bytes = canonical_bytes(&value).unwrap();

    let id = canonical_id(&value, HashAlgorithm::Sha1).unwrap();
    assert_eq!(id, format!("sha1_{}", hash_bytes(HashAlgorithm::Sha1, &bytes)));
    assert_eq!(id.len(), "sha1_".len() + 40);

    let id256 = canonical_id(&value, HashAlgorithm::Sha256).unwrap();
    assert!(id256.starts_with("sha256_"));
    assert_ne!(id, id256);
}

#[test]
fn equal_values_built_differently_share_an_id() {
    let a = json!({ "x": 1, "y": [1, 2] });
    let mut b = serde_json::Map::new();
    b.insert("y".to_string(), json!([1, 2]));
    b.insert("x".to_string(), json!(1));

    assert_eq!(
        canonical_id(&a, HashAlgorithm::Sha1).unwrap(),
        canonical_id(&serde_json::Value::Object(b), HashAlgorithm::Sha1).unwrap()
    );
}

#[test]
fn reference_digests_of_hello_world() {
    let data = b"hello world";
    assert_eq!(hash_bytes(HashAlgorithm::Md5, data), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    assert_eq!(
        hash_bytes(HashAlgorithm::Sha1, data),
        "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
    );
    assert_eq!(
        hash_bytes(HashAlgorithm::Sha256, data),
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
    assert_eq!(hash_bytes(HashAlgorithm::Sha512, data).len(), 128);
    assert_eq!(hash_bytes(HashAlgorithm::Blake3, data).len(), 64);
}

#[test]
fn toml_params_convert_and_reject_non_finite_floats() {
    let table: toml::Table = toml::from_str(
        r#"
threads = 4
ratio = 0.5
flags = ["-v", "-q"]
[nested]
on = true
"#,
    )
    .unwrap();

    let value = from_toml(&toml::Value::Table(table)).unwrap();
    assert_eq!(
        canonical_string(&value).unwrap(),
        r#"{"flags":["-v","-q"],"nested":{"on":true},"ratio":0.5,"threads":4}"#
    );

    let err = from_toml(&toml::Value::Float(f64::NAN)).unwrap_err();
    assert!(matches!(err, ReprodError::InvalidCanonicalForm(_)));
}

#[test]
fn serializable_structs_become_canonical_values() {
    #[derive(serde::Serialize)]
    struct Params {
        cmd: String,
        threads: u32,
    }

    let value = to_canonical_value(&Params {
        cmd: "sort".to_string(),
        threads: 2,
    })
    .unwrap();
    assert_eq!(canonical_string(&value).unwrap(), r#"{"cmd":"sort","threads":2}"#);
}

#[test]
fn transform_uid_ignores_label_but_tracks_params_version_and_inputs() {
    let mut p = Pipeline::new();
    let f = add_file(&mut p, "reads", "data/reads.txt");
    let g = add_file(&mut p, "other", "data/other.txt");
    let base = add_shell(&mut p, "base", "sort $REPROD_INPUT_IN", &[("in", f)]);
    let relabelled = add_shell(&mut p, "relabelled", "sort $REPROD_INPUT_IN", &[("in", f)]);
    let new_cmd = add_shell(&mut p, "new_cmd", "uniq $REPROD_INPUT_IN", &[("in", f)]);
    let new_input = add_shell(&mut p, "new_input", "sort $REPROD_INPUT_IN", &[("in", g)]);
    let renamed_input = add_shell(&mut p, "renamed_input", "sort $REPROD_INPUT_IN", &[("src", f)]);
    let new_version = p.add_transform(
        "new_version",
        "shell",
        "2",
        json!({ "cmd": "sort $REPROD_INPUT_IN" }),
        vec![("in".to_string(), Input::Node(f))],
    );

    let graph = BuildGraph::from_pipeline(
        &p,
        &[base, relabelled, new_cmd, new_input, renamed_input, new_version],
        storage(),
    )
    .unwrap();

    let base_uid = uid_of(&graph, "base");
    // `relabelled` dealiased onto `base`, so both requests share one target.
    assert_eq!(graph.targets().len(), 5);

    for other in ["new_cmd", "new_input", "renamed_input", "new_version"] {
        assert_ne!(base_uid, uid_of(&graph, other), "{other} should differ from base");
    }
}

#[test]
fn external_uid_depends_on_location_and_digests() {
    let mut p = Pipeline::new();
    let plain = add_file(&mut p, "plain", "data/a.txt");
    let moved = add_file(&mut p, "moved", "data/b.txt");
    let pinned = p.add_file(
        "pinned",
        "data/a.txt",
        parse_digests(["md5:5eb63bbbe01eeed093cb22bb8f5acdc3"]).unwrap(),
    );

    let graph = BuildGraph::from_pipeline(&p, &[plain, moved, pinned], storage()).unwrap();
    let uids: Vec<String> = ["plain", "moved", "pinned"]
        .iter()
        .map(|l| uid_of(&graph, l))
        .collect();

    assert_ne!(uids[0], uids[1]);
    assert_ne!(uids[0], uids[2]);
}

#[test]
fn target_uid_differs_from_wrapped_node_and_uses_pipeline_algorithm() {
    let mut p = Pipeline::with_algorithm(HashAlgorithm::Sha256);
    let f = add_file(&mut p, "reads", "data/reads.txt");
    let t = add_shell(&mut p, "sorted", "sort", &[("in", f)]);

    let graph = BuildGraph::from_pipeline(&p, &[t], storage()).unwrap();
    let target = &graph.targets()[0];
    let wrapped = &target.dependencies()[0].node;

    assert_eq!(target.label(), "target:sorted");
    assert_ne!(target.uid().unwrap(), wrapped.uid().unwrap());
    assert!(target.uid().unwrap().starts_with("sha256_"));
    assert_eq!(
        target.canonical().unwrap(),
        json!({ "type": "target", "node": wrapped.uid().unwrap() })
    );
}

#[test]
fn transform_canonical_refers_to_inputs_by_uid() {
    let mut p = Pipeline::new();
    let f = add_file(&mut p, "reads", "data/reads.txt");
    let t = add_shell(&mut p, "sorted", "sort", &[("in", f)]);

    let graph = BuildGraph::from_pipeline(&p, &[t], storage()).unwrap();
    let reads_uid = uid_of(&graph, "reads");
    let sorted = graph.get(&uid_of(&graph, "sorted")).unwrap();

    assert_eq!(
        sorted.canonical().unwrap(),
        json!({
            "type": "transform",
            "op": "shell",
            "version": "1",
            "params": { "cmd": "sort" },
            "inputs": { "in": reads_uid },
        })
    );
}

#[test]
fn literal_inputs_are_not_cacheable() {
    let mut p = Pipeline::new();
    let t = p.add_transform(
        "bad",
        "shell",
        "1",
        json!({ "cmd": "true" }),
        vec![("n".to_string(), Input::Literal(json!(3)))],
    );

    let err = BuildGraph::from_pipeline(&p, &[t], storage()).unwrap_err();
    assert!(matches!(err, ReprodError::NotCacheable(_)), "got {err:?}");
}

#[test]
fn digest_strings_parse_in_every_accepted_form() {
    let md5 = "5eb63bbbe01eeed093cb22bb8f5acdc3";
    for raw in [
        md5.to_string(),
        format!("md5:{md5}"),
        format!("md5_{md5}"),
        format!("hash://md5/{md5}"),
        format!("MD5:{}", md5.to_uppercase()),
    ] {
        assert_eq!(parse_digest(&raw).unwrap(), (HashAlgorithm::Md5, md5.to_string()), "{raw}");
    }

    let sha256 = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
    assert_eq!(parse_digest(sha256).unwrap().0, HashAlgorithm::Sha256);
    assert_eq!(parse_digest(&format!("blake3:{sha256}")).unwrap().0, HashAlgorithm::Blake3);

    assert!(parse_digest("xyz").is_err());
    assert!(parse_digest("abc123").is_err());
    assert!(parse_digest(&format!("sha1:{md5}")).is_err());

    let map: DigestMap = parse_digests([format!("md5:{md5}"), sha256.to_string()]).unwrap();
    assert_eq!(map.len(), 2);
}
