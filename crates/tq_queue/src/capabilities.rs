//! Worker capabilities and matching them against bucket requirements.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use tq_utils::net_protocol::workers::{
    WorkerCapabilities, WorkerCapabilityConstraint, WorkerCapabilityRequirement, WorkerId,
};

/// The capabilities each worker declared the last time it asked for work.
#[derive(Default, Debug)]
pub struct WorkerCapabilitiesStorage {
    capabilities: RwLock<HashMap<WorkerId, WorkerCapabilities>>,
}

impl WorkerCapabilitiesStorage {
    pub fn set_worker_capabilities(&self, worker_id: &WorkerId, capabilities: WorkerCapabilities) {
        self.capabilities
            .write()
            .insert(worker_id.clone(), capabilities);
    }

    pub fn worker_capabilities(&self, worker_id: &WorkerId) -> WorkerCapabilities {
        self.capabilities
            .read()
            .get(worker_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Whether a worker with `capabilities` may run a bucket with `requirements`.
pub fn requirements_are_satisfied(
    requirements: &BTreeSet<WorkerCapabilityRequirement>,
    capabilities: &WorkerCapabilities,
) -> bool {
    requirements.iter().all(|requirement| {
        let value = capabilities
            .iter()
            .find(|capability| capability.name == requirement.capability_name)
            .map(|capability| capability.value.as_str());
        constraint_is_satisfied(&requirement.constraint, value)
    })
}

fn constraint_is_satisfied(constraint: &WorkerCapabilityConstraint, value: Option<&str>) -> bool {
    use WorkerCapabilityConstraint::*;

    match constraint {
        Present => value.is_some(),
        Absent => value.is_none(),
        Equal(expected) => value.map_or(false, |v| compare_versions(v, expected).is_eq()),
        LessThan(bound) => value.map_or(false, |v| compare_versions(v, bound).is_lt()),
        GreaterThan(bound) => value.map_or(false, |v| compare_versions(v, bound).is_gt()),
        All(constraints) => constraints
            .iter()
            .all(|constraint| constraint_is_satisfied(constraint, value)),
        Any(constraints) => constraints
            .iter()
            .any(|constraint| constraint_is_satisfied(constraint, value)),
        Not(constraint) => !constraint_is_satisfied(constraint, value),
    }
}

/// Compares dot-separated values component by component.
/// Components that are both integers compare numerically, anything else lexically.
/// Missing trailing components count as `0`, so `16` and `16.0` are equal.
fn compare_versions(left: &str, right: &str) -> Ordering {
    let mut left = left.split('.');
    let mut right = right.split('.');
    loop {
        let (l, r) = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => (l.unwrap_or("0"), r.unwrap_or("0")),
        };
        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => l.cmp(r),
        };
        if ordering.is_ne() {
            return ordering;
        }
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;

    use tq_utils::net_protocol::workers::{
        WorkerCapability, WorkerCapabilityConstraint as C, WorkerCapabilityRequirement, WorkerId,
    };

    use super::{compare_versions, requirements_are_satisfied, WorkerCapabilitiesStorage};

    fn req(name: &str, constraint: C) -> WorkerCapabilityRequirement {
        WorkerCapabilityRequirement {
            capability_name: name.to_owned(),
            constraint,
        }
    }

    #[test]
    fn version_comparison() {
        assert_eq!(compare_versions("16.4", "16.10"), Ordering::Less);
        assert_eq!(compare_versions("16", "16.0"), Ordering::Equal);
        assert_eq!(compare_versions("17.0.1", "17"), Ordering::Greater);
        assert_eq!(compare_versions("abc", "abd"), Ordering::Less);
        assert_eq!(compare_versions("16.beta", "16.alpha"), Ordering::Greater);
    }

    #[test]
    fn empty_requirements_are_always_satisfied() {
        assert!(requirements_are_satisfied(
            &Default::default(),
            &Default::default()
        ));
    }

    #[test]
    fn constraints() {
        let caps = [
            WorkerCapability::new("os", "16.4"),
            WorkerCapability::new("arch", "arm64"),
        ]
        .into_iter()
        .collect();

        let satisfied = |requirement| {
            requirements_are_satisfied(&[requirement].into_iter().collect(), &caps)
        };

        assert!(satisfied(req("os", C::Present)));
        assert!(!satisfied(req("gpu", C::Present)));
        assert!(satisfied(req("gpu", C::Absent)));
        assert!(satisfied(req("arch", C::Equal("arm64".into()))));
        assert!(satisfied(req("os", C::GreaterThan("16.2".into()))));
        assert!(!satisfied(req("os", C::LessThan("16.2".into()))));
        assert!(!satisfied(req("gpu", C::LessThan("1".into()))));
        assert!(satisfied(req(
            "os",
            C::All(vec![
                C::GreaterThan("15".into()),
                C::LessThan("17".into())
            ])
        )));
        assert!(satisfied(req(
            "os",
            C::Any(vec![C::Equal("15".into()), C::Equal("16.4".into())])
        )));
        assert!(satisfied(req("arch", C::Not(Box::new(C::Equal("x86_64".into()))))));
    }

    #[test]
    fn every_requirement_must_hold() {
        let caps = [WorkerCapability::new("os", "16.4")].into_iter().collect();
        let requirements = [req("os", C::Present), req("gpu", C::Present)]
            .into_iter()
            .collect();

        assert!(!requirements_are_satisfied(&requirements, &caps));
    }

    #[test]
    fn storage_keeps_latest_declaration() {
        let storage = WorkerCapabilitiesStorage::default();
        let worker = WorkerId::from("w1");

        assert!(storage.worker_capabilities(&worker).is_empty());

        storage.set_worker_capabilities(
            &worker,
            [WorkerCapability::new("os", "15")].into_iter().collect(),
        );
        storage.set_worker_capabilities(
            &worker,
            [WorkerCapability::new("os", "16")].into_iter().collect(),
        );

        assert_eq!(
            storage.worker_capabilities(&worker),
            [WorkerCapability::new("os", "16")].into_iter().collect()
        );
    }
}
