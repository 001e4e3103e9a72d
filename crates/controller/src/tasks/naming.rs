//! Deterministic names and labels for every object this system creates

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

const MAX_DNS_LABEL_LENGTH: usize = 63;
const MAX_LABEL_VALUE_LENGTH: usize = 63;

const MANAGED_BY_PREFIX: usize = 10;
const COMMIT_PREFIX: usize = 5;
const DEPLOYMENT_ID_PREFIX: usize = 7;

/// Upper bound for derived image tags
pub const MAX_IMAGE_TAG_LENGTH: usize = 30;

pub const DEPLOY_JOB_TAG: &str = "ds";
pub const ARTIFACT_SECRET_TAG: &str = "artifact";
pub const DOCKERFILE_CONFIG_TAG: &str = "dockerfile";
pub const BUILD_JOB_TAG: &str = "build-push-dockerimage";

pub const LABEL_APP: &str = "app";
pub const LABEL_MANAGED_BY: &str = "managedBy";
pub const LABEL_DEPLOYMENT_ID: &str = "deploymentId";
pub const LABEL_PIPELINE_ID: &str = "pipelineId";
pub const LABEL_COMMIT_ID: &str = "commitId";
pub const LABEL_IDENTIFIER: &str = "identifier";
pub const LABEL_PART_OF: &str = "partOf";
pub const LABEL_RESOURCE_TYPE: &str = "resourceType";

pub const PART_OF_BUILD: &str = "build-pipeline";
pub const PART_OF_APPLICATION: &str = "client-application";
pub const RESOURCE_TYPE_APP_SECRET: &str = "client-application-secret";

static SECRET_NAME_INVALID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\-.]+").expect("Invalid regex pattern"));

pub struct ResourceNaming;

impl ResourceNaming {
    /// `{managedBy≤10}-{tag}-{commit≤5}-{deploymentId≤7}`, as a DNS label.
    ///
    /// A pure function of the three truncated identifiers and the tag.
    #[must_use]
    pub fn resource_name(managed_by: &str, tag: &str, commit_id: &str, deployment_id: &str) -> String {
        let raw = format!(
            "{}-{tag}-{}-{}",
            prefix(managed_by, MANAGED_BY_PREFIX),
            prefix(commit_id, COMMIT_PREFIX),
            prefix(deployment_id, DEPLOYMENT_ID_PREFIX),
        );
        Self::sanitize_dns_label(&raw)
    }

    /// Image tag built from the first half of each id, capped at `max_len`.
    #[must_use]
    pub fn image_tag(commit_id: &str, pipeline_id: &str, max_len: usize) -> String {
        let commit = prefix(commit_id, commit_id.chars().count() / 2);
        let pipeline = prefix(pipeline_id, pipeline_id.chars().count() / 2);

        let tag: String = format!("{commit}{pipeline}")
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .take(max_len)
            .collect();
        let tag = tag.trim_start_matches(['.', '-']);

        if tag.is_empty() {
            "latest".to_string()
        } else {
            tag.to_string()
        }
    }

    /// Lowercase RFC 1123 label: invalid runs become `-`, ends are alphanumeric.
    #[must_use]
    pub fn sanitize_dns_label(value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for c in value.to_lowercase().chars() {
            if c.is_ascii_alphanumeric() {
                out.push(c);
            } else if !out.ends_with('-') {
                out.push('-');
            }
        }

        let truncated: String = out
            .trim_matches('-')
            .chars()
            .take(MAX_DNS_LABEL_LENGTH)
            .collect();
        truncated.trim_end_matches('-').to_string()
    }

    /// Runtime secret names: lowercase, invalid runs replaced by `-`, `-`/`.` trimmed.
    #[must_use]
    pub fn sanitize_secret_name(name: &str) -> String {
        SECRET_NAME_INVALID
            .replace_all(&name.to_lowercase(), "-")
            .trim_matches(['-', '.'])
            .to_string()
    }

    /// Label values: at most 63 characters from `[A-Za-z0-9-_.]` with alphanumeric ends.
    #[must_use]
    pub fn sanitize_label_value(value: &str) -> String {
        let cleaned: String = value
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .collect();

        let trimmed = cleaned.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        let truncated: String = trimmed.chars().take(MAX_LABEL_VALUE_LENGTH).collect();
        truncated
            .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_string()
    }
}

/// Identifiers shared by every object of one deployment attempt
#[derive(Debug, Clone, Default)]
pub struct DeploymentIdentity {
    pub managed_by: String,
    pub deployment_id: String,
    pub pipeline_id: String,
    pub commit_id: String,
}

impl DeploymentIdentity {
    #[must_use]
    pub fn name(&self, tag: &str) -> String {
        ResourceNaming::resource_name(&self.managed_by, tag, &self.commit_id, &self.deployment_id)
    }

    /// Lookup labels plus the `partOf`/`resourceType` markers.
    #[must_use]
    pub fn labels(&self, part_of: &str, resource_type: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        for (key, value) in [
            (LABEL_MANAGED_BY, self.managed_by.as_str()),
            (LABEL_DEPLOYMENT_ID, self.deployment_id.as_str()),
            (LABEL_PIPELINE_ID, self.pipeline_id.as_str()),
            (LABEL_COMMIT_ID, self.commit_id.as_str()),
            (LABEL_PART_OF, part_of),
            (LABEL_RESOURCE_TYPE, resource_type),
        ] {
            let value = ResourceNaming::sanitize_label_value(value);
            if !value.is_empty() {
                labels.insert(key.to_string(), value);
            }
        }
        labels
    }
}

fn prefix(value: &str, len: usize) -> String {
    value.chars().take(len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_name_truncates_each_identifier() {
        let name = ResourceNaming::resource_name(
            "humalect-platform",
            DEPLOY_JOB_TAG,
            "9f8e7d6c5b4a",
            "dep-1234567890",
        );
        assert_eq!(name, "humalect-p-ds-9f8e7-dep-123");
    }

    #[test]
    fn resource_name_is_stable_for_same_identifiers() {
        let a = ResourceNaming::resource_name("Acme", ARTIFACT_SECRET_TAG, "abcdef123", "d-42-xyz");
        let b = ResourceNaming::resource_name("Acme", ARTIFACT_SECRET_TAG, "abcdeZZZZ", "d-42-xyQQQ");
        assert_eq!(a, b);
        assert_eq!(a, "acme-artifact-abcde-d-42-xy");
    }

    #[test]
    fn resource_name_differs_by_tag() {
        let job = ResourceNaming::resource_name("acme", BUILD_JOB_TAG, "abc", "d1");
        let cm = ResourceNaming::resource_name("acme", DOCKERFILE_CONFIG_TAG, "abc", "d1");
        assert_ne!(job, cm);
        assert!(job.len() <= 63);
    }

    #[test]
    fn resource_name_is_a_valid_dns_label() {
        let name = ResourceNaming::resource_name("My_Org!", DEPLOY_JOB_TAG, "ABC", "");
        assert_eq!(name, "my-org-ds-abc");
    }

    #[test]
    fn image_tag_takes_first_half_of_each() {
        assert_eq!(ResourceNaming::image_tag("abcdef", "123456", 30), "abc123");
    }

    #[test]
    fn image_tag_is_bounded_and_deterministic() {
        let commit = "0123456789abcdef0123456789abcdef01234567";
        let pipeline = "pipeline-00000000000000000000000000000000";
        let first = ResourceNaming::image_tag(commit, pipeline, MAX_IMAGE_TAG_LENGTH);
        let second = ResourceNaming::image_tag(commit, pipeline, MAX_IMAGE_TAG_LENGTH);

        assert_eq!(first, second);
        assert_eq!(first.len(), MAX_IMAGE_TAG_LENGTH);
        assert!(first.starts_with("0123456789abcdef0123"));
    }

    #[test]
    fn image_tag_distinguishes_pipelines() {
        let a = ResourceNaming::image_tag("abcdef12", "pipe1111", 30);
        let b = ResourceNaming::image_tag("abcdef12", "pipe2222", 30);
        assert_ne!(a, b);
    }

    #[test]
    fn image_tag_falls_back_to_latest() {
        assert_eq!(ResourceNaming::image_tag("", "", 30), "latest");
        assert_eq!(ResourceNaming::image_tag("a", "b", 30), "latest");
    }

    #[test]
    fn secret_names_are_sanitized() {
        assert_eq!(ResourceNaming::sanitize_secret_name("Prod/App_Secrets"), "prod-app-secrets");
        assert_eq!(ResourceNaming::sanitize_secret_name("..my.secret--"), "my.secret");
        assert_eq!(ResourceNaming::sanitize_secret_name("A  B"), "a-b");
    }

    #[test]
    fn label_values_are_trimmed_to_valid_form() {
        assert_eq!(ResourceNaming::sanitize_label_value("-abc/def-"), "abc-def");
        let long = "x".repeat(80);
        assert_eq!(ResourceNaming::sanitize_label_value(&long).len(), 63);
    }

    #[test]
    fn identity_labels_skip_empty_values() {
        let identity = DeploymentIdentity {
            managed_by: "acme".to_string(),
            deployment_id: "dep-1".to_string(),
            pipeline_id: String::new(),
            commit_id: "abc".to_string(),
        };
        let labels = identity.labels(PART_OF_BUILD, "build-job");

        assert_eq!(labels.get(LABEL_MANAGED_BY).map(String::as_str), Some("acme"));
        assert_eq!(labels.get(LABEL_RESOURCE_TYPE).map(String::as_str), Some("build-job"));
        assert!(!labels.contains_key(LABEL_PIPELINE_ID));
    }
}
