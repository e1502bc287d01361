//! Resolution of operator-supplied identifiers to unique states.

use crate::binding::ZfsBinding;
use crate::dataset::basename;
use crate::error::{LineageError, LineageResult};
use crate::state::{Machine, Machines, State};
use std::collections::BTreeMap;
use std::fmt::Write as _;

impl<B: ZfsBinding> Machines<B> {
    /// Resolve `request` to a unique system state and return it together
    /// with its intra-machine closure, plus the pure user-state saves
    /// hanging off its associated user states.
    ///
    /// `request` can be a full dataset path, a basename (matching several
    /// machines is an error), or a snapshot suffix.
    pub fn lookup_system_state(&self, request: &str) -> LineageResult<(Vec<State>, Vec<State>)> {
        let mut matches: Vec<State> = Vec::new();
        let mut children: Vec<State> = Vec::new();

        for m in self.all.values() {
            if request == m.state.id || request == basename(&m.state.id) {
                matches.push(m.state.clone());
                children = m.system_state_children(&m.state);
            }

            for state in m.history.values() {
                if request == state.id
                    || request == basename(&state.id)
                    || state.id.ends_with(&format!("@{request}"))
                {
                    matches.push(state.clone());
                    children = m.system_state_children(state);
                }
            }
        }

        if matches.is_empty() {
            return Err(LineageError::NotFound {
                kind: "state",
                request: request.to_string(),
            });
        }
        if matches.len() > 1 {
            return Err(LineageError::Ambiguous {
                kind: "state",
                request: request.to_string(),
                candidates: list_candidates(&matches),
            });
        }

        matches.append(&mut children);

        let blockers = self.external_clone_blockers(matches.iter(), true);
        if !blockers.is_empty() {
            return Err(LineageError::ExternalClones(blockers));
        }

        // Clones and snapshots of the user datasets which aren't linked to
        // any system state still need to go with this one.
        let mut other_user_matches = Vec::new();
        let mut errmsg = String::new();
        for (user, us) in &matches[0].users {
            match self.lookup_user_state(user, &us.id, true) {
                Ok(states) => other_user_matches.extend(states),
                Err(err) => {
                    let _ = writeln!(
                        errmsg,
                        "one or multiple manually cloned datasets on user \"{user}\": {err}"
                    );
                }
            }
        }
        if !errmsg.is_empty() {
            return Err(LineageError::BlockedUserStates(errmsg));
        }

        Ok((matches, other_user_matches))
    }

    /// Resolve `request` to a unique state of `user` and return it with its
    /// intra-machine closure.
    ///
    /// With `only_user_state_save`, candidates referenced by a system state
    /// are silently dropped: only pure user saves are wanted. Otherwise any
    /// such reference is an error naming the linked system states.
    pub fn lookup_user_state(
        &self,
        user: &str,
        request: &str,
        only_user_state_save: bool,
    ) -> LineageResult<Vec<State>> {
        if user.is_empty() {
            return Err(LineageError::MissingArgument("user"));
        }
        if request.is_empty() {
            return Err(LineageError::MissingArgument("state id"));
        }

        let user_separator = &self.config.layout.user_separator;
        let mut candidates: Vec<State> = Vec::new();
        let mut children: Vec<State> = Vec::new();

        for m in self.all.values() {
            let Some(states) = m.all_users_states.get(user) else {
                continue;
            };
            for (id, state) in states {
                if request == id
                    || request == basename(id)
                    || format!("{user}{user_separator}{request}") == basename(id)
                    || id.ends_with(&format!("@{request}"))
                {
                    candidates.push(state.clone());
                    children = m.user_state_children(user, state);
                }
            }
        }

        if candidates.is_empty() {
            return Err(LineageError::NotFound {
                kind: "user state",
                request: request.to_string(),
            });
        }
        if candidates.len() > 1 {
            return Err(LineageError::Ambiguous {
                kind: "user state",
                request: request.to_string(),
                candidates: list_candidates(&candidates),
            });
        }

        candidates.append(&mut children);

        // Check for candidates referenced as user datasets of a system
        // state, over every machine's primary and history.
        let mut matches: Vec<State> = Vec::new();
        let mut linked: BTreeMap<String, Vec<String>> = BTreeMap::new();
        'next_candidate: for candidate in &candidates {
            for m in self.all.values() {
                for state in std::iter::once(&m.state).chain(m.history.values()) {
                    for d in state.users_datasets() {
                        if d.name != candidate.id {
                            continue;
                        }
                        if only_user_state_save {
                            continue 'next_candidate;
                        }
                        linked
                            .entry(candidate.id.clone())
                            .or_default()
                            .push(m.id().to_string());
                    }
                }
            }
            matches.push(candidate.clone());
        }

        if !linked.is_empty() {
            let mut errmsg = String::new();
            for (id, systems) in &linked {
                let _ = writeln!(
                    errmsg,
                    "{id} has a dependency linked to several system states: {}",
                    systems.join(", ")
                );
            }
            return Err(LineageError::LinkedToSystem(errmsg));
        }

        let blockers = self.external_clone_blockers(matches.iter(), false);
        if !blockers.is_empty() {
            return Err(LineageError::ExternalClones(blockers));
        }

        Ok(matches)
    }

    /// List the manually cloned datasets, in the persistent area or outside
    /// any managed machine, depending on a snapshot among `states`. Only
    /// snapshots can have clone dependencies outside of their own path.
    fn external_clone_blockers<'a>(
        &self,
        states: impl Iterator<Item = &'a State>,
        include_user_datasets: bool,
    ) -> String {
        let origins = self.external_origins_index();
        let mut blockers = String::new();

        for state in states {
            if !state.is_snapshot() {
                continue;
            }

            let mut names: Vec<String> =
                state.all_datasets().iter().map(|d| d.name.clone()).collect();
            if include_user_datasets {
                names.extend(state.users_datasets().iter().map(|d| d.name.clone()));
            }

            for name in names {
                if let Some(clones) = origins.get(name.as_str()) {
                    for clone in clones {
                        let _ = writeln!(blockers, "  - {clone} is a clone of {name}");
                    }
                }
            }
        }

        blockers
    }
}

impl Machine {
    /// History entries depending on `state` inside this machine: clones of
    /// it when it is a snapshot, snapshots of it when it is a filesystem,
    /// recursively.
    pub(crate) fn system_state_children(&self, state: &State) -> Vec<State> {
        let mut deps = Vec::new();
        for (id, candidate) in &self.history {
            if !is_child(state, id, candidate) {
                continue;
            }
            deps.push(candidate.clone());
            deps.extend(self.system_state_children(candidate));
        }
        deps
    }

    /// Same closure over the history of one user.
    pub(crate) fn user_state_children(&self, user: &str, state: &State) -> Vec<State> {
        let Some(states) = self.all_users_states.get(user) else {
            return Vec::new();
        };
        let mut deps = Vec::new();
        for (id, candidate) in states {
            if !is_child(state, id, candidate) {
                continue;
            }
            deps.push(candidate.clone());
            deps.extend(self.user_state_children(user, candidate));
        }
        deps
    }
}

fn is_child(state: &State, candidate_id: &str, candidate: &State) -> bool {
    if state.is_snapshot() {
        // A clone points back at the snapshot through its route root.
        candidate
            .route_root(candidate_id)
            .is_some_and(|root| root.origin.as_deref() == Some(state.id.as_str()))
    } else {
        candidate_id.starts_with(&format!("{}@", state.id))
    }
}

fn list_candidates(states: &[State]) -> String {
    let mut out = String::new();
    for state in states {
        let _ = writeln!(
            out,
            "  - {} ({})",
            state.id,
            state.last_used.format("%Y-%m-%d %H:%M:%S")
        );
    }
    out
}
