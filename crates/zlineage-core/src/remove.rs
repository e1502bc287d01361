//! Removal of system and user states in dependency order.

use crate::binding::{CancellationToken, ZfsBinding, BOOTFS_DATASETS_PROP};
use crate::dataset::{join_tags, split_tags, Dataset};
use crate::error::{LineageError, LineageResult};
use crate::state::{Machines, State, StateKind};
use log::{error, warn};
use std::collections::HashSet;
use std::sync::Arc;

impl<B: ZfsBinding> Machines<B> {
    /// Remove the given system states and their user-state fan-outs, in the
    /// caller-supplied order.
    ///
    /// Per-user detach failures are logged and swallowed so the system
    /// destroy still gets its chance; leftover user datasets are tolerated
    /// downstream. System dataset destroy failures are fatal.
    pub fn remove_system_states(
        &mut self,
        cancel: &CancellationToken,
        states: &[State],
    ) -> LineageResult<()> {
        let current_id = self.current.clone();

        let mut fs_ids: Vec<&str> = Vec::new();
        for s in states {
            if Some(s.id.as_str()) == current_id.as_deref() {
                return Err(LineageError::CannotRemoveCurrent(s.id.clone()));
            }
            if !s.is_snapshot() {
                fs_ids.push(&s.id);
            }
        }

        'next_state: for s in states {
            if s.is_snapshot() {
                // Destroying the filesystem takes its snapshots down
                // recursively; don't destroy such a snapshot twice.
                for fs_id in &fs_ids {
                    if s.id.starts_with(&format!("{fs_id}@")) {
                        continue 'next_state;
                    }
                }
            }

            for (user, user_state) in &s.users {
                let closure = match self.lookup_user_state(user, &user_state.id, true) {
                    Ok(states) => states,
                    Err(err) => {
                        warn!(
                            "cannot get the list of dependencies for user {user} and state {}: {err}",
                            user_state.id
                        );
                        continue;
                    }
                };

                let mut head = State::new(user_state.id.clone(), user_state.last_used);
                head.datasets
                    .insert(user_state.id.clone(), user_state.all_datasets());

                let mut user_states_to_remove = vec![head];
                user_states_to_remove.extend(closure.into_iter().rev());

                if let Err(err) =
                    self.remove_user_states(cancel, &user_states_to_remove, Some(&s.id))
                {
                    warn!("can't untag or destroy user dataset for {}: {err}", s.id);
                }
            }

            for route in s.datasets.keys() {
                cancel.checkpoint()?;
                self.binding.destroy(route).map_err(|err| {
                    LineageError::DestroyFailed {
                        name: route.clone(),
                        source: Box::new(err),
                    }
                })?;
            }
        }

        self.refresh(cancel)
    }

    /// Untag or destroy the given user states, deepest datasets first.
    ///
    /// `system_state_id` names the association to drop from each dataset's
    /// bootfs-datasets tag; a dataset still claimed by other system states
    /// is rewritten, a dataset on its last claim is destroyed. With no
    /// `system_state_id` every dataset is removed unconditionally.
    pub fn remove_user_states(
        &mut self,
        cancel: &CancellationToken,
        states: &[State],
        system_state_id: Option<&str>,
    ) -> LineageResult<()> {
        let separator = self.config.layout.tag_separator.clone();

        // When a snapshot and its parent filesystem are both listed, keep
        // only the filesystem: destroying it removes the snapshot, and
        // snapshots carry no bootfs-datasets tag of their own.
        let mut candidates: Vec<&State> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        'next_state: for s in states {
            if let StateKind::Snapshot { parent, .. } = &s.kind {
                for other in states {
                    if &other.id == parent {
                        continue 'next_state;
                    }
                }
            }
            if seen.insert(s.id.as_str()) {
                candidates.push(s);
            }
        }

        let mut datasets_to_delete: Vec<Arc<Dataset>> = Vec::new();
        for s in &candidates {
            for ds in s.datasets.values() {
                for d in ds {
                    let new_tags: Vec<&str> = match system_state_id {
                        Some(system_id) => split_tags(&d.bootfs_datasets, &separator)
                            .into_iter()
                            .filter(|tag| *tag != system_id)
                            .collect(),
                        None => Vec::new(),
                    };
                    let new_tag = join_tags(&new_tags, &separator);

                    if !new_tag.is_empty() {
                        // Still claimed by other system states: untag only.
                        cancel.checkpoint()?;
                        let mut tx = self.binding.transaction()?;
                        if let Err(err) =
                            tx.set_property(BOOTFS_DATASETS_PROP, &new_tag, &d.name, false)
                        {
                            drop(tx);
                            return Err(LineageError::PropertySetFailed {
                                property: BOOTFS_DATASETS_PROP,
                                dataset: d.name.clone(),
                                source: Box::new(err),
                            });
                        }
                        tx.commit()?;
                    } else {
                        // Last claim: destroy, in reverse discovery order
                        // so the deepest dataset goes first.
                        datasets_to_delete.insert(0, Arc::clone(d));
                    }
                }
            }
        }

        for d in &datasets_to_delete {
            cancel.checkpoint()?;
            self.binding.destroy(&d.name).map_err(|err| {
                LineageError::DestroyFailed {
                    name: d.name.clone(),
                    source: Box::new(err),
                }
            })?;
        }

        self.refresh(cancel)
    }
}

impl State {
    /// Destroy an isolated state assumed to have no remaining dependencies.
    ///
    /// For snapshots the associated user states are destroyed best effort
    /// (a clone can keep one alive). For filesystems the user datasets are
    /// untagged instead; the rewrite retains at most the first tag entry
    /// not naming this state.
    pub fn remove<B: ZfsBinding>(&self, binding: &B, tag_separator: &str) -> LineageResult<()> {
        for route in self.datasets.keys() {
            binding
                .destroy(route)
                .map_err(|err| LineageError::DestroyFailed {
                    name: route.clone(),
                    source: Box::new(err),
                })?;
        }

        if self.is_snapshot() {
            for us in self.users.values() {
                if let Err(err) = binding.destroy(&us.id) {
                    error!("couldn't destroy {}: {err}", us.id);
                }
            }
            return Ok(());
        }

        let mut tx = binding.transaction()?;
        for us in self.users.values() {
            for d in us.all_datasets() {
                let mut new_tags: Vec<&str> = Vec::new();
                for tag in split_tags(&d.bootfs_datasets, tag_separator) {
                    if tag != self.id {
                        new_tags.push(tag);
                        break;
                    }
                }
                let new_tag = join_tags(&new_tags, tag_separator);

                if let Err(err) = tx.set_property(BOOTFS_DATASETS_PROP, &new_tag, &d.name, false) {
                    drop(tx);
                    return Err(LineageError::PropertySetFailed {
                        property: BOOTFS_DATASETS_PROP,
                        dataset: d.name.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }
        tx.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{machines_with, sample_pool, set_tags, user_fs, Fixture};
    use crate::LineageConfig;

    fn alice_state<B: ZfsBinding>(ms: &Machines<B>) -> State {
        ms.machine(Fixture::MACHINE_A).unwrap().all_users_states["alice"]
            [Fixture::USER_ALICE]
            .clone()
    }

    #[test]
    fn shared_user_dataset_is_untagged_not_destroyed() {
        let mut datasets = sample_pool();
        // Claimed by two system states.
        set_tags(
            &mut datasets,
            Fixture::USER_ALICE,
            &format!("{}:{}", Fixture::MACHINE_A, Fixture::CLONE_B),
        );

        let mut ms = machines_with(datasets, None);
        let state = alice_state(&ms);

        ms.remove_user_states(
            &CancellationToken::new(),
            &[state],
            Some(Fixture::MACHINE_A),
        )
        .unwrap();

        let writes = ms.binding().writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].dataset, Fixture::USER_ALICE);
        assert_eq!(writes[0].value, Fixture::CLONE_B);
        assert!(ms.binding().destroy_log().is_empty());
    }

    #[test]
    fn sole_claim_destroys_the_dataset_without_rewriting() {
        let mut ms = machines_with(sample_pool(), None);
        let state = alice_state(&ms);

        ms.remove_user_states(
            &CancellationToken::new(),
            &[state],
            Some(Fixture::MACHINE_A),
        )
        .unwrap();

        assert_eq!(ms.binding().destroy_log(), vec![Fixture::USER_ALICE]);
        assert!(ms.binding().writes().is_empty());
    }

    #[test]
    fn queued_destroys_run_deepest_first() {
        let mut datasets = sample_pool();
        datasets.push(user_fs(
            "rpool/USERDATA/alice_x1/projects",
            Fixture::MACHINE_A,
        ));

        let mut ms = machines_with(datasets, None);
        let state = alice_state(&ms);

        ms.remove_user_states(
            &CancellationToken::new(),
            &[state],
            Some(Fixture::MACHINE_A),
        )
        .unwrap();

        assert_eq!(
            ms.binding().destroy_log(),
            vec![
                "rpool/USERDATA/alice_x1/projects".to_string(),
                Fixture::USER_ALICE.to_string(),
            ]
        );
    }

    #[test]
    fn duplicate_candidates_collapse_to_a_single_destroy() {
        let mut ms = machines_with(sample_pool(), None);
        let state = alice_state(&ms);

        ms.remove_user_states(
            &CancellationToken::new(),
            &[state.clone(), state],
            Some(Fixture::MACHINE_A),
        )
        .unwrap();

        assert_eq!(ms.binding().destroy_log(), vec![Fixture::USER_ALICE]);
    }

    #[test]
    fn snapshot_listed_with_its_filesystem_is_subsumed() {
        let mut ms = machines_with(sample_pool(), None);
        let machine = ms.machine(Fixture::MACHINE_A).unwrap();
        let fs_state = machine.all_users_states["alice"][Fixture::USER_ALICE].clone();
        let snap_state = machine.all_users_states["alice"][Fixture::USER_ALICE_SNAP].clone();

        ms.remove_user_states(&CancellationToken::new(), &[fs_state, snap_state], None)
            .unwrap();

        assert_eq!(ms.binding().destroy_log(), vec![Fixture::USER_ALICE]);
    }

    #[test]
    fn destroy_failure_is_fatal() {
        let mut ms = machines_with(sample_pool(), None);
        let state = alice_state(&ms);
        ms.binding().fail_destroy_of(Fixture::USER_ALICE);

        let err = ms
            .remove_user_states(
                &CancellationToken::new(),
                &[state],
                Some(Fixture::MACHINE_A),
            )
            .unwrap_err();

        assert!(matches!(err, LineageError::DestroyFailed { .. }));
    }

    #[test]
    fn cancelled_token_stops_before_any_destroy() {
        let mut ms = machines_with(sample_pool(), None);
        let state = alice_state(&ms);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ms
            .remove_user_states(&cancel, &[state], Some(Fixture::MACHINE_A))
            .unwrap_err();

        assert!(matches!(err, LineageError::Cancelled));
        assert!(ms.binding().destroy_log().is_empty());
        assert!(ms.binding().writes().is_empty());
    }

    #[test]
    fn current_state_is_protected() {
        let mut ms = machines_with(sample_pool(), Some(Fixture::MACHINE_A));
        let state = ms.machine(Fixture::MACHINE_A).unwrap().state.clone();

        let err = ms
            .remove_system_states(&CancellationToken::new(), &[state])
            .unwrap_err();

        assert!(matches!(err, LineageError::CannotRemoveCurrent(_)));
        assert!(ms.binding().destroy_log().is_empty());
    }

    #[test]
    fn filesystem_in_batch_subsumes_its_snapshot() {
        let mut ms = machines_with(sample_pool(), None);
        let machine = ms.machine(Fixture::MACHINE_A).unwrap();
        let fs_state = machine.state.clone();
        let snap_state = machine.history[Fixture::SNAP_A].clone();

        ms.remove_system_states(&CancellationToken::new(), &[fs_state, snap_state])
            .unwrap();

        let destroyed = ms.binding().destroy_log();
        // The associated user dataset is detached first, then the system
        // route; the snapshot is never destroyed on its own.
        assert_eq!(
            destroyed,
            vec![
                Fixture::USER_ALICE.to_string(),
                Fixture::MACHINE_A.to_string(),
            ]
        );
    }

    #[test]
    fn leaf_remove_of_a_snapshot_destroys_its_user_states_best_effort() {
        let ms = machines_with(sample_pool(), None);
        let snap_state = ms.machine(Fixture::MACHINE_A).unwrap().history[Fixture::SNAP_A].clone();

        snap_state
            .remove(ms.binding(), &ms.config().layout.tag_separator)
            .unwrap();

        let destroyed = ms.binding().destroy_log();
        assert!(destroyed.contains(&Fixture::SNAP_A.to_string()));
        assert!(destroyed.contains(&Fixture::USER_ALICE_SNAP.to_string()));
    }

    #[test]
    fn leaf_remove_rewrite_keeps_at_most_the_first_surviving_tag() {
        let mut datasets = sample_pool();
        set_tags(
            &mut datasets,
            Fixture::USER_ALICE,
            &format!(
                "{}:{}:rpool/ROOT/ubuntu_c",
                Fixture::CLONE_B,
                Fixture::MACHINE_A
            ),
        );

        let ms = machines_with(datasets, None);
        let state = ms.machine(Fixture::MACHINE_A).unwrap().state.clone();

        state
            .remove(ms.binding(), &ms.config().layout.tag_separator)
            .unwrap();

        let writes = ms.binding().writes();
        let rewrite = writes
            .iter()
            .find(|w| w.dataset == Fixture::USER_ALICE)
            .unwrap();
        assert_eq!(rewrite.value, Fixture::CLONE_B);
    }

    #[test]
    fn failed_property_write_reverts_the_transaction() {
        let ms = machines_with(sample_pool(), None);
        let mut state = ms.machine(Fixture::MACHINE_A).unwrap().state.clone();

        // A second user whose dataset does not exist in the pool makes the
        // second write fail after the first succeeded.
        let mut ghost = State::new("rpool/USERDATA/bob_gone", chrono::DateTime::UNIX_EPOCH);
        ghost.datasets.insert(
            "rpool/USERDATA/bob_gone".to_string(),
            vec![std::sync::Arc::new(crate::Dataset::new(
                "rpool/USERDATA/bob_gone",
            ))],
        );
        state.users.insert("bob".to_string(), ghost);

        let err = state
            .remove(ms.binding(), &ms.config().layout.tag_separator)
            .unwrap_err();
        assert!(matches!(err, LineageError::PropertySetFailed { .. }));

        // The successful write on alice's dataset was rolled back.
        assert!(ms.binding().writes().is_empty());
        let alice = ms.binding().dataset(Fixture::USER_ALICE).unwrap();
        assert_eq!(alice.bootfs_datasets, Fixture::MACHINE_A);
    }

    #[test]
    fn unconditional_removal_ignores_tags() {
        let mut datasets = sample_pool();
        set_tags(
            &mut datasets,
            Fixture::USER_ALICE,
            &format!("{}:{}", Fixture::MACHINE_A, Fixture::CLONE_B),
        );

        let mut ms = machines_with(datasets, None);
        let state = alice_state(&ms);

        ms.remove_user_states(&CancellationToken::new(), &[state], None)
            .unwrap();

        assert!(ms.binding().writes().is_empty());
        assert_eq!(ms.binding().destroy_log(), vec![Fixture::USER_ALICE]);
    }

    #[test]
    fn config_separator_drives_tag_parsing() {
        let mut config = LineageConfig::default();
        config.layout.tag_separator = ",".to_string();

        let mut datasets = sample_pool();
        set_tags(
            &mut datasets,
            Fixture::USER_ALICE,
            &format!("{},{}", Fixture::MACHINE_A, Fixture::CLONE_B),
        );

        let mut ms = crate::testutil::machines_with_config(datasets, config, None);
        let state = alice_state(&ms);

        ms.remove_user_states(
            &CancellationToken::new(),
            &[state],
            Some(Fixture::MACHINE_A),
        )
        .unwrap();

        let writes = ms.binding().writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].value, Fixture::CLONE_B);
    }
}
