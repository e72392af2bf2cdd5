//! Database service lifecycle through `systemctl`.

use strum::{Display, EnumString};

use crate::tool_traits::ToolArgs;

/// systemd action applied to the database unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
}

/// Type-safe arguments for `systemctl <start|stop> <unit>`.
#[derive(Debug, Clone)]
pub struct ServiceArgs {
    /// `systemctl` executable.
    pub program: String,
    pub action: ServiceAction,
    /// Unit name (e.g. `mysql`).
    pub unit: String,
}

impl ServiceArgs {
    pub fn new(program: &str, action: ServiceAction, unit: &str) -> Self {
        Self {
            program: program.to_string(),
            action,
            unit: unit.to_string(),
        }
    }
}

impl ToolArgs for ServiceArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.action.to_string(), self.unit.clone()]
    }

    fn purpose(&self) -> &str {
        match self.action {
            ServiceAction::Start => "start database service",
            ServiceAction::Stop => "stop database service",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_args() {
        let args = ServiceArgs::new("systemctl", ServiceAction::Stop, "mysql");
        assert_eq!(args.program(), "systemctl");
        assert_eq!(args.to_cli_args(), vec!["stop", "mysql"]);
        assert_eq!(args.purpose(), "stop database service");
        assert!(args.is_destructive());
    }

    #[test]
    fn test_service_action_parse() {
        assert_eq!("start".parse::<ServiceAction>().unwrap(), ServiceAction::Start);
        assert_eq!(ServiceAction::Stop.to_string(), "stop");
    }
}
