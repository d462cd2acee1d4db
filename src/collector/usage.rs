use std::collections::HashMap;

use crate::kubernetes::{ContainerMetrics, PodMetricsItem};
use crate::parsing::{format_cpu_nanocores, format_memory_bytes, parse_cpu_to_nanocores, parse_memory_to_bytes};
use crate::types::ResourceUsage;

#[derive(Debug, Default)]
pub struct UsageTable {
    by_namespace: HashMap<String, HashMap<String, ResourceUsage>>,
}

impl UsageTable {
    pub fn from_items(items: Vec<PodMetricsItem>) -> Self {
        let mut table = Self::default();
        for item in items {
            let name = item.name();
            if name.is_empty() {
                continue;
            }
            let usage = aggregate_container_usage(&item.containers);
            table.insert(item.namespace(), name, usage);
        }
        table
    }

    pub fn insert(&mut self, namespace: &str, name: &str, usage: ResourceUsage) {
        self.by_namespace
            .entry(namespace.to_string())
            .or_default()
            .insert(name.to_string(), usage);
    }

    pub fn lookup(&self, namespace: &str, name: &str) -> Option<&ResourceUsage> {
        self.by_namespace.get(namespace)?.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_namespace.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pod-level usage from its containers.
///
/// A single container's values are kept exactly as reported. With several
/// containers the values are summed without rounding. A resource stays empty
/// when nobody reported it or when any reported value is unparseable.
pub fn aggregate_container_usage(containers: &[ContainerMetrics]) -> ResourceUsage {
    if let [only] = containers {
        return ResourceUsage {
            cpu: only.usage.get("cpu").cloned().unwrap_or_default(),
            memory: only.usage.get("memory").cloned().unwrap_or_default(),
        };
    }

    ResourceUsage {
        cpu: sum_reported(containers, "cpu", parse_cpu_to_nanocores)
            .map(format_cpu_nanocores)
            .unwrap_or_default(),
        memory: sum_reported(containers, "memory", |q| parse_memory_to_bytes(q).map(i128::from))
            .and_then(|b| i64::try_from(b).ok())
            .map(format_memory_bytes)
            .unwrap_or_default(),
    }
}

fn sum_reported(containers: &[ContainerMetrics], resource: &str, parse: impl Fn(&str) -> Option<i128>) -> Option<i128> {
    let mut reported = containers.iter().filter_map(|c| c.usage.get(resource)).peekable();
    reported.peek()?;
    reported.try_fold(0i128, |total, q| total.checked_add(parse(q.as_str())?))
}
