use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;

use crate::{CommandPayload, TaskActivity};

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
    #[error("invalid float '{value}' for {context}: {source}")]
    InvalidFloat {
        value: String,
        context: &'static str,
        source: ParseFloatError,
    },
    #[error("{context} must be positive, got {value}")]
    NotPositive { value: f64, context: &'static str },
    #[error("invalid json command: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a single text command.
///
/// ```text
/// week [n]                  advance n weeks (default 1)
/// plant|harvest <field>     field work
/// crush <kg>                crush grapes into must
/// ferment <litres>          ferment must into wine
/// maintain|upgrade <bldg>   building work
/// hire <candidate>          recruit a new staff member
/// assign <task> <id,id,..>  replace the staff of a task
/// tool|untool <task> <tool> select or deselect a tool (e.g. "Harvest Bins#2")
/// buy <bldg> <tool type>    purchase a tool into a building slot
/// sell <bldg> <tool>        sell an unlocked tool
/// cancel <task>             drop a task and release its tools
/// tasks                     list active tasks
/// save                      flush state to the store
/// ```
pub fn parse_command_line(input: &str) -> Result<CommandPayload, CommandParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CommandParseError::Empty);
    }

    let mut parts = trimmed.split_whitespace();
    let verb = parts
        .next()
        .map(|v| v.to_ascii_lowercase())
        .ok_or(CommandParseError::Empty)?;

    match verb.as_str() {
        "week" | "turn" => {
            let steps_str = parts.next().unwrap_or("1");
            let steps = parse_u32(steps_str, "week steps")?;
            Ok(CommandPayload::Week { steps })
        }
        "plant" | "harvest" => {
            let field = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("field"))?;
            let activity = if verb == "plant" {
                TaskActivity::Planting
            } else {
                TaskActivity::Harvesting
            };
            Ok(CommandPayload::Schedule {
                activity,
                target: Some(field.to_string()),
                amount: None,
            })
        }
        "crush" | "ferment" => {
            let (context, activity) = if verb == "crush" {
                ("crush kilograms", TaskActivity::Crushing)
            } else {
                ("ferment litres", TaskActivity::Fermentation)
            };
            let amount_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("amount"))?;
            let amount = parse_positive_f64(amount_str, context)?;
            Ok(CommandPayload::Schedule {
                activity,
                target: None,
                amount: Some(amount),
            })
        }
        "maintain" | "upgrade" => {
            let building = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("building"))?;
            let activity = if verb == "maintain" {
                TaskActivity::Maintenance
            } else {
                TaskActivity::Upgrade
            };
            Ok(CommandPayload::Schedule {
                activity,
                target: Some(building.to_string()),
                amount: None,
            })
        }
        "hire" => {
            let candidate = rest(parts);
            if candidate.is_empty() {
                return Err(CommandParseError::MissingArgument("candidate"));
            }
            Ok(CommandPayload::Hire { candidate })
        }
        "assign" => {
            let task_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("task"))?;
            let task_id = parse_u64(task_str, "assign task")?;
            let staff = match parts.next() {
                Some(list) if list != "-" => list
                    .split(',')
                    .filter(|token| !token.is_empty())
                    .map(|token| parse_u32(token, "assign staff"))
                    .collect::<Result<Vec<_>, _>>()?,
                _ => Vec::new(),
            };
            Ok(CommandPayload::AssignStaff { task_id, staff })
        }
        "tool" | "untool" => {
            let task_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("task"))?;
            let task_id = parse_u64(task_str, "tool task")?;
            let tool = rest(parts);
            if tool.is_empty() {
                return Err(CommandParseError::MissingArgument("tool"));
            }
            if verb == "tool" {
                Ok(CommandPayload::SelectTool { task_id, tool })
            } else {
                Ok(CommandPayload::DeselectTool { task_id, tool })
            }
        }
        "buy" | "sell" => {
            let building = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("building"))?
                .to_string();
            let name = rest(parts);
            if verb == "buy" {
                if name.is_empty() {
                    return Err(CommandParseError::MissingArgument("tool type"));
                }
                Ok(CommandPayload::BuyTool {
                    building,
                    tool_type: name,
                })
            } else {
                if name.is_empty() {
                    return Err(CommandParseError::MissingArgument("tool"));
                }
                Ok(CommandPayload::SellTool {
                    building,
                    tool: name,
                })
            }
        }
        "cancel" => {
            let task_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("task"))?;
            let task_id = parse_u64(task_str, "cancel task")?;
            Ok(CommandPayload::Cancel { task_id })
        }
        "tasks" | "list" => Ok(CommandPayload::ListTasks),
        "save" => Ok(CommandPayload::Save),
        other => Err(CommandParseError::UnknownCommand(other.to_string())),
    }
}

fn rest<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.collect::<Vec<_>>().join(" ")
}

fn parse_u32(value: &str, context: &'static str) -> Result<u32, CommandParseError> {
    value
        .parse::<u32>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

fn parse_u64(value: &str, context: &'static str) -> Result<u64, CommandParseError> {
    value
        .parse::<u64>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

fn parse_positive_f64(value: &str, context: &'static str) -> Result<f64, CommandParseError> {
    let parsed = value
        .parse::<f64>()
        .map_err(|source| CommandParseError::InvalidFloat {
            value: value.to_string(),
            context,
            source,
        })?;
    if !parsed.is_finite() || parsed <= 0.0 {
        return Err(CommandParseError::NotPositive {
            value: parsed,
            context,
        });
    }
    Ok(parsed)
}
