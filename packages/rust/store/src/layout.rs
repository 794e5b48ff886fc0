//! Key layout of the state namespace.
//!
//! Every document the pipeline persists is addressed through these
//! builders; the layout is the wire format for inter-worker handoff.

/// Namespace prefix for all promotion state.
const NAMESPACE: &str = "graybox_promote";

/// Top-level project queue — the scheduler's single discovery surface.
pub fn project_queue() -> String {
    format!("{NAMESPACE}/project_queue.json")
}

/// Root key of one project's documents. `project` starts with `/`.
pub fn project_root(project: &str) -> String {
    format!("{NAMESPACE}{project}")
}

/// Per-project status document (status, frozen params, audit log).
pub fn project_status(project: &str) -> String {
    format!("{}/status.json", project_root(project))
}

/// Batch-name → status map, shared by every stage (versioned document).
pub fn batch_status(project: &str) -> String {
    format!("{}/batch_status.json", project_root(project))
}

/// One batch's immutable work-item list.
pub fn batch_file(project: &str, batch_name: &str) -> String {
    format!("{}/batches/{batch_name}.json", project_root(project))
}

/// Annotated work items accumulated by the discovery stage.
pub fn discovered_items(project: &str) -> String {
    format!("{}/discovered_items.json", project_root(project))
}

/// Promote batches: batch-name → destination paths of generated artifacts.
pub fn promote_batches(project: &str) -> String {
    format!("{}/promote_batches.json", project_root(project))
}

/// Copy batches: batch-name → source→destination pairs.
pub fn copy_batches(project: &str) -> String {
    format!("{}/copy_batches.json", project_root(project))
}

/// Successful promotes, keyed by batch name (dedup on replay).
pub fn promoted_paths(project: &str) -> String {
    format!("{}/promoted_paths.json", project_root(project))
}

/// Successful copies, keyed by batch name (dedup on replay).
pub fn copied_paths(project: &str) -> String {
    format!("{}/copied_paths.json", project_root(project))
}

/// Flat array of promote failure descriptors.
pub fn promote_errors(project: &str) -> String {
    format!("{}/promote_errors.json", project_root(project))
}

/// Flat array of copy failure descriptors.
pub fn copy_errors(project: &str) -> String {
    format!("{}/copy_errors.json", project_root(project))
}

/// Preview statuses per batch.
pub fn preview_status(project: &str) -> String {
    format!("{}/preview_status.json", project_root(project))
}

/// Flat array of failed preview paths.
pub fn preview_errors(project: &str) -> String {
    format!("{}/preview_errors.json", project_root(project))
}

/// Destinations whose production copy was modified after the staging
/// snapshot — flagged for manual reconciliation.
pub fn newer_destination_files(project: &str) -> String {
    format!("{}/newer_destination_files.json", project_root(project))
}

/// Staging area for a transformed artifact, content-addressed by its
/// destination path.
pub fn artifact(project: &str, destination_path: &str) -> String {
    format!("{}/artifacts{destination_path}", project_root(project))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_rooted_under_namespace() {
        let project = "/site-graybox/summer-launch";
        assert_eq!(
            project_status(project),
            "graybox_promote/site-graybox/summer-launch/status.json"
        );
        assert_eq!(
            batch_file(project, "processing_batch_2"),
            "graybox_promote/site-graybox/summer-launch/batches/processing_batch_2.json"
        );
        assert_eq!(project_queue(), "graybox_promote/project_queue.json");
    }

    #[test]
    fn artifact_key_embeds_destination() {
        assert_eq!(
            artifact("/gb/exp", "/drafts/page.docx"),
            "graybox_promote/gb/exp/artifacts/drafts/page.docx"
        );
    }
}
