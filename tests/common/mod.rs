use reasoner_planner::{
    Concludable, Conclusion, ConjunctionBuilder, ConjunctionId, Constraint, InMemoryStatistics,
    Logic, PlannerConfig, RelationConstraint, ResolvableId, RolePlayer, SearchStrategy, Unifier,
};

/// Types a person variable may take
#[allow(dead_code)]
pub const PERSON: &[&str] = &["person", "man"];
/// Types a name variable may take
#[allow(dead_code)]
pub const NAME: &[&str] = &["first-name", "last-name"];

/// Helper function to create the statistics of the social schema
///
/// persons 3 + men 2, names 3 + 2, households 2, friendships 3.
#[allow(dead_code)]
pub fn social_statistics() -> InMemoryStatistics {
    InMemoryStatistics::new()
        .with_things("person", 3)
        .with_things("man", 2)
        .with_things("first-name", 3)
        .with_things("last-name", 2)
        .with_things("household", 2)
        .with_things("friendship", 3)
        .with_has_edges("person", "first-name", 1)
        .with_has_edges("person", "last-name", 1)
        .with_has_edges("man", "first-name", 2)
        .with_has_edges("man", "last-name", 1)
        .with_role_players("household:member", 4)
        .with_role_players("friendship:friendor", 3)
        .with_role_players("friendship:friendee", 3)
}

/// Helper function to create a household membership constraint
#[allow(dead_code)]
pub fn household(relation: &str, members: &[&str]) -> RelationConstraint {
    RelationConstraint::new(
        relation,
        members
            .iter()
            .map(|m| RolePlayer::new(Some("member"), &["household:member"], m))
            .collect(),
    )
}

/// Helper function to create a friendship constraint
#[allow(dead_code)]
pub fn friendship(relation: &str, friendor: &str, friendee: &str) -> RelationConstraint {
    RelationConstraint::new(
        relation,
        vec![
            RolePlayer::new(Some("friendor"), &["friendship:friendor"], friendor),
            RolePlayer::new(Some("friendee"), &["friendship:friendee"], friendee),
        ],
    )
}

/// Helper function to register a conjunction whose resolvables are
/// retrievables over the given variable sets
///
/// A single variable becomes an `isa`, larger sets chain `has` constraints.
#[allow(dead_code)]
pub fn shaped(label: &str, shape: &[&[&str]]) -> (Logic, ConjunctionId) {
    let mut builder = ConjunctionBuilder::new(label);
    for vars in shape {
        for var in *vars {
            builder = builder.thing(var, PERSON);
        }
        let constraints = if vars.len() == 1 {
            vec![Constraint::isa(vars[0])]
        } else {
            vars.windows(2)
                .map(|pair| Constraint::has(pair[0], pair[1]))
                .collect()
        };
        builder = builder.retrievable(constraints);
    }
    let mut logic = Logic::new();
    let id = logic
        .add_conjunction(builder)
        .expect("Failed to register shaped conjunction");
    (logic, id)
}

/// `$x isa person` style condition over a single person variable
#[allow(dead_code)]
pub fn person_condition(logic: &mut Logic, label: &str, var: &str) -> ConjunctionId {
    logic
        .add_conjunction(
            ConjunctionBuilder::new(label)
                .thing(var, PERSON)
                .retrievable(vec![Constraint::isa(var)]),
        )
        .expect("Failed to register person condition")
}

/// Helper function to create the "everyone is called Dave" schema
///
/// `$p has name $n` is concluded by a rule giving every person the name
/// "Dave". Returns the query conjunction and the rule condition.
#[allow(dead_code)]
pub fn dave_schema(logic: &mut Logic) -> (ConjunctionId, ConjunctionId) {
    let condition = person_condition(logic, "dave-condition", "x");
    let rule = logic
        .add_rule(
            "everyone-is-dave",
            condition,
            Conclusion::explicit_has("x", "name", "Dave"),
        )
        .expect("Failed to register rule");
    let query = logic
        .add_conjunction(
            ConjunctionBuilder::new("named")
                .thing("p", PERSON)
                .thing("n", NAME)
                .concludable(Concludable::has("p", "n")),
        )
        .expect("Failed to register query");
    logic
        .add_application(
            query,
            ResolvableId(0),
            rule,
            vec![Unifier::new().map("p", "x").map("n", "name")],
        )
        .expect("Failed to register application");
    (query, condition)
}

/// Helper function to create a transitive friendship schema
///
/// The rule condition chains two inferred friendships, so the condition
/// triggers itself. Returns the query and the recursive condition.
#[allow(dead_code)]
pub fn transitive_friendship_schema(logic: &mut Logic) -> (ConjunctionId, ConjunctionId) {
    let condition = logic
        .add_conjunction(
            ConjunctionBuilder::new("friend-of-friend")
                .thing("f1", &["friendship"])
                .thing("f2", &["friendship"])
                .thing("x", PERSON)
                .thing("y", PERSON)
                .thing("z", PERSON)
                .concludable(Concludable::Relation(friendship("f1", "x", "y")))
                .concludable(Concludable::Relation(friendship("f2", "y", "z"))),
        )
        .expect("Failed to register condition");
    let rule = logic
        .add_rule(
            "transitive-friendship",
            condition,
            Conclusion::relation("f", &["x", "z"]),
        )
        .expect("Failed to register rule");
    logic
        .add_application(
            condition,
            ResolvableId(0),
            rule,
            vec![Unifier::new().map("f1", "f").map("x", "x").map("y", "z")],
        )
        .expect("Failed to register application");
    logic
        .add_application(
            condition,
            ResolvableId(1),
            rule,
            vec![Unifier::new().map("f2", "f").map("y", "x").map("z", "z")],
        )
        .expect("Failed to register application");

    let query = logic
        .add_conjunction(
            ConjunctionBuilder::new("friends")
                .thing("f", &["friendship"])
                .thing("a", PERSON)
                .thing("b", PERSON)
                .retrievable(vec![Constraint::isa("a")])
                .concludable(Concludable::Relation(friendship("f", "a", "b"))),
        )
        .expect("Failed to register query");
    logic
        .add_application(
            query,
            ResolvableId(1),
            rule,
            vec![Unifier::new().map("f", "f").map("a", "x").map("b", "z")],
        )
        .expect("Failed to register application");
    (query, condition)
}

/// Helper function to create a planner configuration for one strategy
#[allow(dead_code)]
pub fn config(strategy: SearchStrategy) -> PlannerConfig {
    PlannerConfig {
        strategy,
        ..PlannerConfig::default()
    }
}

/// Helper function to check that `ordering` is a permutation of `0..len`
#[allow(dead_code)]
pub fn is_permutation(ordering: &[ResolvableId], len: usize) -> bool {
    let mut seen = vec![false; len];
    for id in ordering {
        match seen.get_mut(id.0) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    ordering.len() == len
}
