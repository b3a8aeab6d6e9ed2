// ABOUTME: namespace command handlers: ls, create, update, rm and inspect.
// ABOUTME: Counts that cannot be read show as "?" and surface as warnings.

use super::context::Context;
use highk::diagnostics::Diagnostics;
use highk::error::Result;
use highk::namespace::{NamespaceManager, NamespaceSummary};
use highk::output::{Output, OutputMode};

fn count(value: Option<usize>) -> String {
    value.map_or_else(|| "?".to_string(), |n| n.to_string())
}

fn row(ns: &NamespaceSummary) -> Vec<String> {
    let labels = ns
        .labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    vec![
        ns.name.clone(),
        count(ns.containers),
        count(ns.images),
        count(ns.volumes),
        labels,
    ]
}

pub async fn ls(ctx: &Context, quiet: bool) -> Result<()> {
    let runtime = ctx.connect().await?;
    let manager = NamespaceManager::new(&runtime, ctx.data_store()?);
    let mut diag = Diagnostics::default();
    let namespaces = manager.list(&mut diag).await?;

    let output = Output::new(if quiet { OutputMode::Quiet } else { OutputMode::Normal });
    output.warnings(&diag);
    output.listing(
        &["NAME", "CONTAINERS", "IMAGES", "VOLUMES", "LABELS"],
        &namespaces,
        row,
    );
    Ok(())
}

pub async fn create(ctx: &Context, name: &str, labels: &[String]) -> Result<()> {
    let runtime = ctx.connect().await?;
    NamespaceManager::new(&runtime, ctx.data_store()?)
        .create(name, labels)
        .await
}

pub async fn update(ctx: &Context, name: &str, labels: &[String]) -> Result<()> {
    let runtime = ctx.connect().await?;
    NamespaceManager::new(&runtime, ctx.data_store()?)
        .update(name, labels)
        .await
}

pub async fn rm(ctx: &Context, names: &[String], cgroup: bool) -> Result<()> {
    let runtime = ctx.connect().await?;
    let manager = NamespaceManager::new(&runtime, ctx.data_store()?);
    let mut diag = Diagnostics::default();
    let (removed, result) = manager.remove(names, cgroup, &mut diag).await;
    let output = Output::new(OutputMode::Normal);
    for name in removed {
        output.line(&name);
    }
    output.warnings(&diag);
    result
}

pub async fn inspect(ctx: &Context, names: &[String]) -> Result<()> {
    let runtime = ctx.connect().await?;
    let manager = NamespaceManager::new(&runtime, ctx.data_store()?);
    let (documents, result) = manager.inspect(names).await;
    Output::new(OutputMode::Normal).document(&documents)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn unreadable_counts_show_as_question_marks() {
        let summary = NamespaceSummary {
            name: "default".to_string(),
            containers: Some(2),
            images: None,
            volumes: Some(0),
            labels: BTreeMap::from([("team".to_string(), "infra".to_string())]),
        };
        assert_eq!(row(&summary), ["default", "2", "?", "0", "team=infra"]);
    }
}
