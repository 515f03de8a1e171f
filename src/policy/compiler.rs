//! Policy compilation: selection rules + statements -> materialised permissions (§4.6)

use super::grammar::{self, Expr};
use super::variables::{extract_variables, PolicyVariable};
use crate::error::{CdaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Statement effect. Only `Allow` is honored; `Deny` is reserved and parsed
/// but never contributes permissions (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    /// Grants the listed operations on the listed resources.
    Allow,
    /// Reserved; never materialised into permissions.
    Deny,
}

/// A single ALLOW/DENY statement attached to a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyStatement {
    /// ALLOW or DENY (DENY reserved).
    pub effect: Effect,
    /// Operation name list; empty entries are skipped.
    pub operations: Vec<String>,
    /// Resource pattern list; empty entries are skipped.
    pub resources: Vec<String>,
}

/// A device group's selection rule plus the policy it references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefinition {
    /// Boolean selection-rule expression (§4.6 grammar).
    pub selection_rule: String,
    /// Name of the policy (in `DeviceGroupsConfig::policies`) this group uses.
    pub policy_name: String,
}

/// A single materialised (operation, resource) grant for a group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Permission {
    /// The group this permission was derived for.
    pub principal: String,
    /// Exact operation name, or `*`.
    pub operation: String,
    /// Resource pattern, possibly containing `${...}` tokens and/or a
    /// trailing `*`.
    pub resource: String,
    /// Every `${...}` token found in `resource`, for validation/diagnostics.
    pub resource_policy_variables: BTreeSet<PolicyVariable>,
}

/// The fully compiled output of [`PolicyCompiler::compile`].
#[derive(Debug, Clone)]
pub struct GroupConfiguration {
    /// Group name -> definition, as given.
    pub definitions: BTreeMap<String, GroupDefinition>,
    /// Policy name -> statements, as given.
    pub policies: BTreeMap<String, Vec<PolicyStatement>>,
    /// Group name -> parsed selection-rule AST.
    pub compiled_rules: BTreeMap<String, Expr>,
    /// Group name -> materialised permission set.
    pub group_to_permissions: BTreeMap<String, BTreeSet<Permission>>,
    /// Whether any permission references a `${iot:Connection.Thing...}` variable.
    pub has_device_attribute_variables: bool,
}

impl GroupConfiguration {
    /// Groups whose compiled selection rule evaluates true for `thing_name`.
    pub fn matching_groups<'a>(&'a self, thing_name: Option<&str>) -> Vec<&'a str> {
        self.compiled_rules
            .iter()
            .filter(|(_, expr)| expr.evaluate(thing_name))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Compiles device group/policy configuration into a [`GroupConfiguration`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyCompiler;

impl PolicyCompiler {
    /// Compile `definitions`/`policies` per the §4.6 pipeline.
    pub fn compile(
        definitions: &BTreeMap<String, GroupDefinition>,
        policies: &BTreeMap<String, Vec<PolicyStatement>>,
    ) -> Result<GroupConfiguration> {
        let mut compiled_rules = BTreeMap::new();
        for (group_name, def) in definitions {
            let expr = grammar::parse(&def.selection_rule).map_err(|_| {
                CdaError::InvalidConfiguration(format!(
                    "group {group_name:?} has an unparsable selection rule"
                ))
            })?;
            compiled_rules.insert(group_name.clone(), expr);
        }

        let mut group_to_permissions = BTreeMap::new();
        let mut has_device_attribute_variables = false;

        for (group_name, def) in definitions {
            let statements = policies.get(&def.policy_name).ok_or_else(|| {
                CdaError::PolicyException(format!(
                    "Policy definition {} does not have a corresponding policy",
                    def.policy_name
                ))
            })?;

            let mut permissions = BTreeSet::new();
            for statement in statements {
                if statement.effect != Effect::Allow {
                    continue;
                }
                for operation in &statement.operations {
                    if operation.is_empty() {
                        continue;
                    }
                    for resource in &statement.resources {
                        if resource.is_empty() {
                            continue;
                        }
                        let variables = extract_variables(resource).map_err(|_| {
                            CdaError::PolicyException(
                                "Policy contains unknown variables".to_string(),
                            )
                        })?;
                        if !variables.is_empty() {
                            has_device_attribute_variables = true;
                        }
                        permissions.insert(Permission {
                            principal: group_name.clone(),
                            operation: operation.clone(),
                            resource: resource.clone(),
                            resource_policy_variables: variables.into_iter().collect(),
                        });
                    }
                }
            }
            group_to_permissions.insert(group_name.clone(), permissions);
        }

        Ok(GroupConfiguration {
            definitions: definitions.clone(),
            policies: policies.clone(),
            compiled_rules,
            group_to_permissions,
            has_device_attribute_variables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (
        BTreeMap<String, GroupDefinition>,
        BTreeMap<String, Vec<PolicyStatement>>,
    ) {
        let mut definitions = BTreeMap::new();
        definitions.insert(
            "cameras".to_string(),
            GroupDefinition {
                selection_rule: r#"thingName:"camera-*""#.to_string(),
                policy_name: "camera-policy".to_string(),
            },
        );
        let mut policies = BTreeMap::new();
        policies.insert(
            "camera-policy".to_string(),
            vec![PolicyStatement {
                effect: Effect::Allow,
                operations: vec!["mqtt:Publish".to_string()],
                resources: vec![
                    "mqtt:topic:clients/${iot:Connection.Thing.ThingName}/data".to_string(),
                ],
            }],
        );
        (definitions, policies)
    }

    #[test]
    fn compiles_valid_group_configuration() {
        let (definitions, policies) = sample();
        let config = PolicyCompiler::compile(&definitions, &policies).unwrap();
        assert!(config.has_device_attribute_variables);
        let permissions = &config.group_to_permissions["cameras"];
        assert_eq!(permissions.len(), 1);
        assert!(config
            .matching_groups(Some("camera-01"))
            .contains(&"cameras"));
    }

    #[test]
    fn missing_policy_reference_fails() {
        let (mut definitions, _policies) = sample();
        definitions.get_mut("cameras").unwrap().policy_name = "missing".to_string();
        let err = PolicyCompiler::compile(&definitions, &BTreeMap::new()).unwrap_err();
        assert_eq!(err.external_code(), "PolicyException");
    }

    #[test]
    fn unknown_variable_fails() {
        let (definitions, mut policies) = sample();
        policies.get_mut("camera-policy").unwrap()[0].resources =
            vec!["mqtt:topic:${bogus}".to_string()];
        let err = PolicyCompiler::compile(&definitions, &policies).unwrap_err();
        assert_eq!(err.external_code(), "PolicyException");
    }

    #[test]
    fn empty_operation_and_resource_strings_skipped() {
        let (definitions, mut policies) = sample();
        policies.get_mut("camera-policy").unwrap()[0]
            .operations
            .push(String::new());
        policies.get_mut("camera-policy").unwrap()[0]
            .resources
            .push(String::new());
        let config = PolicyCompiler::compile(&definitions, &policies).unwrap();
        assert_eq!(config.group_to_permissions["cameras"].len(), 1);
    }
}
