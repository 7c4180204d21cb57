use crate::{
    error::{FgaError, Result},
    models::*,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Authorization model evaluated by the in-memory engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Type definitions keyed by object type
    pub types: HashMap<ObjectType, TypeDefinition>,
}

/// Relations available on one object type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: ObjectType,
    pub relations: Vec<RelationDefinition>,
}

/// How a relation can be obtained
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    /// Object types that may appear as the tuple user
    pub assignable_from: Vec<ObjectType>,
    /// Whether direct tuples may carry the time-boxed grant condition
    pub conditional: bool,
    /// Relations on the same object that imply this one
    pub implied_by: Vec<String>,
    /// Whether holding this relation on the parent grants it here
    pub from_parent: bool,
    pub description: String,
}

impl Default for Schema {
    fn default() -> Self {
        Self::account_hierarchy()
    }
}

impl Schema {
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Account → Workspace → {PpgPolicy, CmpConfiguration} model
    pub fn account_hierarchy() -> Self {
        let mut types = HashMap::new();

        types.insert(ObjectType::User, TypeDefinition {
            name: ObjectType::User,
            relations: Vec::new(),
        });

        for object_type in ObjectType::RESOURCES {
            let inherits = object_type.parent_type().is_some();
            let mut relations = vec![
                RelationDefinition {
                    name: Role::Admin.relation().to_string(),
                    assignable_from: vec![ObjectType::User],
                    conditional: true,
                    implied_by: Vec::new(),
                    from_parent: inherits,
                    description: "Full control, including sharing".to_string(),
                },
                RelationDefinition {
                    name: Role::Editor.relation().to_string(),
                    assignable_from: vec![ObjectType::User],
                    conditional: true,
                    implied_by: vec![Role::Admin.relation().to_string()],
                    from_parent: inherits,
                    description: "Can modify the resource".to_string(),
                },
                RelationDefinition {
                    name: Role::Reader.relation().to_string(),
                    assignable_from: vec![ObjectType::User],
                    conditional: true,
                    implied_by: vec![Role::Editor.relation().to_string()],
                    from_parent: inherits,
                    description: "Read-only access".to_string(),
                },
            ];

            if let Some(parent_type) = object_type.parent_type() {
                relations.push(RelationDefinition {
                    name: PARENT_RELATION.to_string(),
                    assignable_from: vec![parent_type],
                    conditional: false,
                    implied_by: Vec::new(),
                    from_parent: false,
                    description: format!("Owning {}", parent_type),
                });
            }

            if object_type == ObjectType::CmpConfiguration {
                relations.push(RelationDefinition {
                    name: Role::Reviewer.relation().to_string(),
                    assignable_from: vec![ObjectType::User],
                    conditional: true,
                    implied_by: Vec::new(),
                    from_parent: false,
                    description: "Can review configuration changes".to_string(),
                });
            }

            types.insert(object_type, TypeDefinition {
                name: object_type,
                relations,
            });
        }

        Self { types }
    }

    pub fn relation(&self, object_type: ObjectType, name: &str) -> Option<&RelationDefinition> {
        self.types
            .get(&object_type)?
            .relations
            .iter()
            .find(|r| r.name == name)
    }

    /// Validate that a write conforms to the schema
    pub fn validate_write(&self, write: &TupleWrite) -> Result<()> {
        let user: ObjectRef = write.key.user.parse()?;
        let object: ObjectRef = write.key.object.parse()?;

        let definition = self
            .relation(object.object_type, &write.key.relation)
            .ok_or_else(|| invalid_input(format!(
                "relation '{}#{}' not found",
                object.object_type, write.key.relation
            )))?;

        if !definition.assignable_from.contains(&user.object_type) {
            return Err(invalid_input(format!(
                "type '{}' is not an allowed type restriction for '{}#{}'",
                user.object_type, object.object_type, definition.name
            )));
        }

        if let Some(ref condition) = write.condition {
            if !definition.conditional || condition.name != TEMPORARY_GRANT_CONDITION {
                return Err(invalid_input(format!(
                    "condition '{}' is not allowed on '{}#{}'",
                    condition.name, object.object_type, definition.name
                )));
            }
        }

        Ok(())
    }

    /// Validate the schema is well-formed
    pub fn validate(&self) -> Result<()> {
        for definition in self.types.values() {
            for relation in &definition.relations {
                for implied in &relation.implied_by {
                    if self.relation(definition.name, implied).is_none() {
                        return Err(FgaError::Config(format!(
                            "{}#{} is implied by undefined relation '{}'",
                            definition.name, relation.name, implied
                        )));
                    }
                }
                if relation.from_parent && definition.name.parent_type().is_none() {
                    return Err(FgaError::Config(format!(
                        "{}#{} inherits from a parent but {} has none",
                        definition.name, relation.name, definition.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn invalid_input(message: String) -> FgaError {
    FgaError::Validation {
        code: "validation_error".to_string(),
        message,
    }
}

/// Evaluates a tuple condition against the request context
pub fn evaluate_condition(condition: &Condition, request: &Context) -> Result<bool> {
    if condition.name != TEMPORARY_GRANT_CONDITION {
        return Err(invalid_input(format!("unknown condition '{}'", condition.name)));
    }

    let grant_time = timestamp_param(condition, request, GRANT_TIME_KEY)?;
    let window = string_param(condition, request, GRANT_DURATION_KEY)?;
    let window = parse_engine_duration(&window)?;
    let current_time = timestamp_param(condition, request, CURRENT_TIME_KEY)?;

    Ok(grant_time
        .checked_add_signed(window)
        .map_or(true, |expires_at| current_time < expires_at))
}

fn string_param(condition: &Condition, request: &Context, name: &str) -> Result<String> {
    condition
        .context
        .get(name)
        .or_else(|| request.get(name))
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .ok_or_else(|| FgaError::Validation {
            code: "missing_condition_parameter".to_string(),
            message: format!("condition '{}' is missing parameter '{}'", condition.name, name),
        })
}

fn timestamp_param(condition: &Condition, request: &Context, name: &str) -> Result<DateTime<Utc>> {
    let raw = string_param(condition, request, name)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| invalid_input(format!("parameter '{}' is not a timestamp: {}", name, e)))
}

/// Parses `<n><unit>` sequences such as `2s`, `1h30m` or `1d`
pub fn parse_engine_duration(raw: &str) -> Result<chrono::Duration> {
    let malformed = || invalid_input(format!("malformed duration '{}'", raw));

    let mut total = chrono::Duration::zero();
    let mut digits = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let count: i64 = digits.parse().map_err(|_| malformed())?;
        digits.clear();
        let part = match c {
            'd' => chrono::Duration::try_days(count),
            'h' => chrono::Duration::try_hours(count),
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                chrono::Duration::try_milliseconds(count)
            }
            'm' => chrono::Duration::try_minutes(count),
            's' => chrono::Duration::try_seconds(count),
            _ => return Err(malformed()),
        }
        .ok_or_else(malformed)?;
        total = total.checked_add(&part).ok_or_else(malformed)?;
    }

    if !digits.is_empty() || raw.is_empty() {
        return Err(malformed());
    }
    Ok(total)
}
