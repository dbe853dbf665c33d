//! JSON schema for the check report.

/// JSON Schema the serialized `CheckReport` must satisfy.
pub const REPORT_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "$id": "https://gatepass.dev/schemas/check-report.json",
  "title": "Gatepass Check Report",
  "type": "object",
  "required": ["schema_version", "run_id", "bundle_root", "generated_at", "entries", "findings"],
  "properties": {
    "schema_version": {
      "type": "string",
      "pattern": "^\\d+\\.\\d+\\.\\d+$"
    },
    "run_id": {
      "type": "string"
    },
    "bundle_root": {
      "type": "string"
    },
    "generated_at": {
      "type": "string",
      "format": "date-time"
    },
    "entries": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["path", "kind", "archs", "signed"],
        "properties": {
          "path": { "type": "string" },
          "kind": {
            "type": "string",
            "enum": ["executable", "dylib", "framework_binary", "archive", "other"]
          },
          "archs": { "type": "array", "items": { "type": "string" } },
          "signed": { "type": "boolean" }
        }
      }
    },
    "findings": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["entry", "category", "severity", "details", "fixable"],
        "properties": {
          "entry": { "type": "string" },
          "category": {
            "type": "string",
            "enum": [
              "unresolved_reference",
              "external_rpath",
              "rpath_needs_rewrite",
              "load_path_needs_rewrite",
              "library_id_needs_rewrite",
              "library_not_in_bundle",
              "missing_signature",
              "invalid_signature",
              "build_version_incomplete",
              "build_version_too_old",
              "nested_archive",
              "external_symlink",
              "immutable_entry"
            ]
          },
          "severity": { "type": "string", "enum": ["blocking", "advisory"] },
          "details": { "type": "string" },
          "fixable": { "type": "boolean" }
        }
      }
    }
  }
}"#;
