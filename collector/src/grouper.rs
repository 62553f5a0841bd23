//! Partitioning of decoded contexts into aggregation groups.
//!
//! Scoping runs outermost to innermost: identity (API ids and names, service
//! ids and names, then routes inside each service group), then HTTP method.
//! Contexts not singled out by any scope end up in one indistinct remainder.
//! Every group is non-empty and the groups returned by [`Grouper::groups`]
//! partition the contexts of the poll.

use crate::scope::{Dimension, ScopePolicy};
use crate::snapshot::{ContextId, KongState};
use indexmap::{IndexMap, IndexSet};

pub type Group = IndexSet<ContextId>;

pub struct Grouper<'a> {
    state: &'a KongState,
    policy: &'a ScopePolicy,
}

impl<'a> Grouper<'a> {
    pub fn new(state: &'a KongState, policy: &'a ScopePolicy) -> Self {
        Grouper { state, policy }
    }

    /// The finest partition required by the policy, in discovery order.
    pub fn groups(&self) -> Vec<Group> {
        self.http_method_scoped_groups()
    }

    /// Splits every identity group by method, then promotes members of the
    /// indistinct remainder whose method is reported into per-method groups.
    pub fn http_method_scoped_groups(&self) -> Vec<Group> {
        let (distinct, mut indistinct) = self.api_and_route_scoped_groups();
        indistinct.extend(self.unscoped_group());

        if !self.policy.will_report(Dimension::HttpMethod) {
            let mut groups = distinct;
            if !indistinct.is_empty() {
                groups.push(indistinct);
            }
            return groups;
        }

        let mut groups = Vec::new();
        for group in distinct {
            let (by_method, rest) = self.split(&group, Dimension::HttpMethod);
            groups.extend(by_method.into_values());
            if !rest.is_empty() {
                groups.push(rest);
            }
        }

        let (promoted, rest) = self.split(&indistinct, Dimension::HttpMethod);
        groups.extend(promoted.into_values());
        if !rest.is_empty() {
            groups.push(rest);
        }
        groups
    }

    /// API groups followed by route groups, and the merged remainder of both
    /// identity models.
    pub fn api_and_route_scoped_groups(&self) -> (Vec<Group>, Group) {
        let (mut distinct, mut indistinct) = self.api_scoped_groups();
        let (route_groups, route_rest) = self.route_scoped_groups();
        distinct.extend(route_groups);
        indistinct.extend(route_rest);
        (distinct, indistinct)
    }

    pub fn api_scoped_groups(&self) -> (Vec<Group>, Group) {
        self.identity_scoped_groups(Dimension::ApiId, Dimension::ApiName)
    }

    pub fn service_scoped_groups(&self) -> (Vec<Group>, Group) {
        self.identity_scoped_groups(Dimension::ServiceId, Dimension::ServiceName)
    }

    /// Sub-partitions each service group by route. Routes are only promoted
    /// out of the service remainder, never out of another model's contexts.
    pub fn route_scoped_groups(&self) -> (Vec<Group>, Group) {
        let (service_groups, service_rest) = self.service_scoped_groups();
        if !self.policy.will_report(Dimension::RouteId) {
            return (service_groups, service_rest);
        }

        let mut groups = Vec::new();
        for group in service_groups {
            let (by_route, rest) = self.split(&group, Dimension::RouteId);
            groups.extend(by_route.into_values());
            if !rest.is_empty() {
                groups.push(rest);
            }
        }

        let (promoted, rest) = self.split(&service_rest, Dimension::RouteId);
        groups.extend(promoted.into_values());
        (groups, rest)
    }

    /// Contexts with neither an API nor a service, such as health checks.
    pub fn unscoped_group(&self) -> Group {
        let services = self.state.indices.service_ids.unset();
        self.state
            .indices
            .api_ids
            .unset()
            .iter()
            .filter(|id| services.contains(*id))
            .cloned()
            .collect()
    }

    fn identity_scoped_groups(&self, id_dim: Dimension, name_dim: Dimension) -> (Vec<Group>, Group) {
        let ids = self.state.indices.get(id_dim);
        let mut distinct = Vec::new();
        let mut indistinct = Group::new();

        if self.policy.will_report(id_dim) {
            let (hits, misses) = self.policy.scope(id_dim).filter(ids.values());
            let report_names = self.policy.will_report(name_dim);
            for id in hits {
                let Some(members) = ids.get(Some(id)) else {
                    continue;
                };
                if report_names {
                    // One id seen under several names stays split by name.
                    let (by_name, rest) = self.split(members, name_dim);
                    distinct.extend(by_name.into_values());
                    if !rest.is_empty() {
                        distinct.push(rest);
                    }
                } else {
                    distinct.push(members.clone());
                }
            }
            for id in misses {
                indistinct.extend(ids.get(Some(id)).into_iter().flatten().cloned());
            }
        } else if self.policy.will_report(name_dim) {
            let with_id = ids.with_value();
            let names = self.state.indices.get(name_dim);
            let (hits, misses) = self.policy.scope(name_dim).filter(names.values());
            for name in hits {
                let group: Group = names
                    .get(Some(name))
                    .into_iter()
                    .flatten()
                    .filter(|id| with_id.contains(*id))
                    .cloned()
                    .collect();
                if !group.is_empty() {
                    distinct.push(group);
                }
            }
            indistinct.extend(
                names
                    .unset()
                    .iter()
                    .chain(misses.into_iter().filter_map(|n| names.get(Some(n))).flatten())
                    .filter(|id| with_id.contains(*id))
                    .cloned(),
            );
        } else {
            indistinct = ids.with_value();
        }

        (distinct, indistinct)
    }

    /// Splits `group` by the value of `dimension`. Each admitted value gets
    /// its own group, keyed in member order; members without a value or with a
    /// rejected value form the remainder. Builds new sets, leaving `group`
    /// untouched.
    fn split(&self, group: &Group, dimension: Dimension) -> (IndexMap<&'a str, Group>, Group) {
        let scope = self.policy.scope(dimension);
        let mut hits: IndexMap<&'a str, Group> = IndexMap::new();
        let mut rest = Group::new();
        for id in group {
            let value = self
                .state
                .context(id)
                .and_then(|context| context.value(dimension));
            match value {
                Some(value) if scope.admits(value) => {
                    hits.entry(value).or_default().insert(id.clone());
                }
                _ => {
                    rest.insert(id.clone());
                }
            }
        }
        (hits, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DimensionConfig, ScopeConfig};
    use crate::testutils::{
        api, counters, decode, fixture_view, methods_view, policy, renamed_view, service,
        unscoped, view,
    };

    fn groups(state: &KongState, policy: &ScopePolicy) -> Vec<Group> {
        Grouper::new(state, policy).groups()
    }

    fn assert_partition(state: &KongState, groups: &[Group]) {
        let mut seen = Group::new();
        for group in groups {
            assert!(!group.is_empty());
            for id in group {
                assert!(seen.insert(id.clone()), "{id} in more than one group");
            }
        }
        let all: Group = state.metrics.keys().cloned().collect();
        assert_eq!(seen.len(), all.len());
        assert!(all.iter().all(|id| seen.contains(id)));
    }

    /// Renders a group as the sorted raw fields that identify its members.
    fn describe(state: &KongState, group: &Group) -> Vec<String> {
        let mut members: Vec<String> = group
            .iter()
            .map(|id| {
                let context = state.context(id).unwrap();
                Dimension::CONTEXT
                    .iter()
                    .map(|d| context.value(*d).unwrap_or("-"))
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .collect();
        members.sort();
        members
    }

    #[test]
    fn default_scope_isolates_every_context() {
        let state = decode(&fixture_view());
        let policy = policy(ScopeConfig::default());
        let groups = groups(&state, &policy);
        assert_partition(&state, &groups);

        let described: Vec<_> = groups.iter().map(|g| describe(&state, g)).collect();
        assert_eq!(
            described,
            vec![
                vec!["a1/aOne/-/-/-/GET"],
                vec!["a1/aOne/-/-/-/POST"],
                vec!["a2/aTwo/-/-/-/GET"],
                vec!["-/-/s1/sOne/r1/GET"],
                vec!["-/-/s1/sOne/r2/DELETE"],
                vec!["-/-/s2/sTwo/r3/PATCH"],
                vec!["-/-/-/-/-/GET"],
                vec!["-/-/-/-/-/-"],
            ]
        );
    }

    #[test]
    fn nothing_reported_is_one_group() {
        let state = decode(&fixture_view());
        let policy = policy(ScopeConfig::unscoped());
        let groups = groups(&state, &policy);
        assert_eq!(groups.len(), 1);
        assert_partition(&state, &groups);
    }

    #[test]
    fn empty_state_has_no_groups() {
        let state = decode(&view(vec![]));
        let policy = policy(ScopeConfig::default());
        assert!(groups(&state, &policy).is_empty());
    }

    #[test]
    fn id_flag_on_and_off() {
        let state = decode(&fixture_view());

        let mut scope = ScopeConfig::unscoped();
        scope.api_ids = DimensionConfig::default();
        let reported = policy(scope);
        let (distinct, rest) = Grouper::new(&state, &reported).api_scoped_groups();
        assert!(rest.is_empty());
        assert_eq!(distinct.len(), 2);
        assert_eq!(distinct[0].len(), 2);
        assert_eq!(distinct[1].len(), 1);

        let unreported = policy(ScopeConfig::unscoped());
        let (distinct, rest) = Grouper::new(&state, &unreported).api_scoped_groups();
        assert!(distinct.is_empty());
        assert_eq!(rest, state.indices.api_ids.with_value());
        assert_eq!(rest.len(), 3);
    }

    #[test]
    fn id_misses_collapse() {
        let state = decode(&fixture_view());
        let mut scope = ScopeConfig::unscoped();
        scope.api_ids.whitelist = vec!["a1".into()];
        scope.service_ids.blacklist = vec!["s2".into()];
        scope.service_ids.report = true;
        let policy = policy(scope);
        let grouper = Grouper::new(&state, &policy);

        let (distinct, rest) = grouper.api_scoped_groups();
        assert_eq!(distinct.len(), 1);
        assert_eq!(describe(&state, &distinct[0]).len(), 2);
        assert_eq!(describe(&state, &rest), vec!["a2/aTwo/-/-/-/GET"]);

        let (distinct, rest) = grouper.service_scoped_groups();
        assert_eq!(distinct.len(), 1);
        assert_eq!(
            describe(&state, &distinct[0]),
            vec!["-/-/s1/sOne/r1/GET", "-/-/s1/sOne/r2/DELETE"]
        );
        assert_eq!(describe(&state, &rest), vec!["-/-/s2/sTwo/r3/PATCH"]);

        let groups = grouper.groups();
        assert_partition(&state, &groups);
        assert_eq!(groups.len(), 3);
        assert_eq!(
            describe(&state, &groups[2]),
            vec![
                "-/-/-/-/-/-",
                "-/-/-/-/-/GET",
                "-/-/s2/sTwo/r3/PATCH",
                "a2/aTwo/-/-/-/GET"
            ]
        );
    }

    #[test]
    fn names_without_ids() {
        let state = decode(&view(vec![
            (api("a1", "shared", Some("GET")), counters(&[("200", 1)])),
            (api("a2", "shared", Some("GET")), counters(&[("200", 1)])),
            (api("a3", "other", Some("GET")), counters(&[("200", 1)])),
            (api("a4", "hidden", Some("GET")), counters(&[("200", 1)])),
        ]));
        let mut scope = ScopeConfig::unscoped();
        scope.api_names = DimensionConfig::default();
        scope.api_names.blacklist = vec!["hidden".into()];
        let policy = policy(scope);
        let (distinct, rest) = Grouper::new(&state, &policy).api_scoped_groups();
        assert_eq!(distinct.len(), 2);
        assert_eq!(distinct[0].len(), 2);
        assert_eq!(describe(&state, &rest), vec!["a4/hidden/-/-/-/GET"]);
    }

    #[test]
    fn renamed_resource_is_not_merged() {
        let state = decode(&renamed_view());
        let policy = policy(ScopeConfig::default());
        let groups = groups(&state, &policy);
        assert_eq!(groups.len(), 2);
        assert_eq!(describe(&state, &groups[0]), vec!["a1/before/-/-/-/GET"]);
        assert_eq!(describe(&state, &groups[1]), vec!["a1/after/-/-/-/GET"]);

        // Without name reporting the id is one group.
        let mut scope = ScopeConfig::unscoped();
        scope.api_ids = DimensionConfig::default();
        let policy = crate::testutils::policy(scope);
        assert_eq!(Grouper::new(&state, &policy).groups().len(), 1);
    }

    #[test]
    fn routes_nest_inside_services() {
        let state = decode(&fixture_view());
        let mut scope = ScopeConfig::unscoped();
        scope.service_ids = DimensionConfig::default();
        scope.route_ids.whitelist = vec!["r1".into()];
        let policy = policy(scope);
        let (distinct, rest) = Grouper::new(&state, &policy).route_scoped_groups();
        let described: Vec<_> = distinct.iter().map(|g| describe(&state, g)).collect();
        assert_eq!(
            described,
            vec![
                vec!["-/-/s1/sOne/r1/GET"],
                vec!["-/-/s1/sOne/r2/DELETE"],
                vec!["-/-/s2/sTwo/r3/PATCH"],
            ]
        );
        assert!(rest.is_empty());
    }

    #[test]
    fn routes_promoted_from_service_remainder() {
        let state = decode(&view(vec![
            (service("s1", "sOne", "r1", Some("GET")), counters(&[("200", 1)])),
            (service("s1", "sOne", "r2", Some("GET")), counters(&[("200", 1)])),
            (service("s2", "sTwo", "r1", Some("GET")), counters(&[("200", 1)])),
        ]));
        let mut scope = ScopeConfig::unscoped();
        scope.route_ids.whitelist = vec!["r1".into()];
        let policy = policy(scope);
        let grouper = Grouper::new(&state, &policy);
        let (distinct, rest) = grouper.route_scoped_groups();
        assert_eq!(distinct.len(), 1);
        assert_eq!(
            describe(&state, &distinct[0]),
            vec!["-/-/s1/sOne/r1/GET", "-/-/s2/sTwo/r1/GET"]
        );
        assert_eq!(describe(&state, &rest), vec!["-/-/s1/sOne/r2/GET"]);
        assert_partition(&state, &grouper.groups());
    }

    #[test]
    fn method_whitelist_yields_three_groups() {
        let state = decode(&methods_view());
        let mut scope = ScopeConfig::unscoped();
        scope.http_methods.whitelist = vec!["GET".into(), "POST".into()];
        let policy = policy(scope);
        let groups = groups(&state, &policy);
        assert_partition(&state, &groups);
        assert_eq!(groups.len(), 3);

        fn methods<'s>(state: &'s KongState, group: &Group) -> IndexSet<&'s str> {
            group
                .iter()
                .filter_map(|id| state.context(id).and_then(|c| c.http_method.as_deref()))
                .collect()
        }
        assert_eq!(methods(&state, &groups[0]), IndexSet::from(["GET"]));
        assert_eq!(methods(&state, &groups[1]), IndexSet::from(["POST"]));
        assert_eq!(
            methods(&state, &groups[2]),
            IndexSet::from(["PATCH", "DELETE"])
        );
        assert_eq!(groups[2].len(), 4);
    }

    #[test]
    fn methods_split_distinct_groups() {
        let state = decode(&fixture_view());
        let mut scope = ScopeConfig::unscoped();
        scope.api_ids = DimensionConfig::default();
        scope.http_methods.whitelist = vec!["GET".into()];
        let policy = policy(scope);
        let groups = groups(&state, &policy);
        assert_partition(&state, &groups);
        let described: Vec<_> = groups.iter().map(|g| describe(&state, g)).collect();
        assert_eq!(
            described,
            vec![
                vec!["a1/aOne/-/-/-/GET"],
                vec!["a1/aOne/-/-/-/POST"],
                vec!["a2/aTwo/-/-/-/GET"],
                vec!["-/-/-/-/-/GET", "-/-/s1/sOne/r1/GET"],
                vec![
                    "-/-/-/-/-/-",
                    "-/-/s1/sOne/r2/DELETE",
                    "-/-/s2/sTwo/r3/PATCH"
                ],
            ]
        );
    }

    #[test]
    fn null_method_never_promoted() {
        let state = decode(&view(vec![
            (unscoped(None), counters(&[("200", 1)])),
            (unscoped(Some("GET")), counters(&[("200", 1)])),
        ]));
        let policy = policy(ScopeConfig::default());
        let groups = groups(&state, &policy);
        assert_eq!(groups.len(), 2);
        assert_eq!(describe(&state, &groups[0]), vec!["-/-/-/-/-/GET"]);
        assert_eq!(describe(&state, &groups[1]), vec!["-/-/-/-/-/-"]);
    }

    #[test]
    fn grouping_is_deterministic() {
        let state = decode(&fixture_view());
        let policy = policy(ScopeConfig::default());
        assert_eq!(groups(&state, &policy), groups(&state, &policy));
    }
}
