//! Operator command line.
//!
//! Flags follow the single-dash style (`-generate -type basic`); `--flag` and
//! `-flag=value` are accepted too.
//!
//! ```text
//! tollgate -generate -type professional -org org-123 -duration 730
//! tollgate -validate ABCD1234-EFAB5678-0000FFFF-12345678
//! tollgate -revoke ABCD1234-EFAB5678-0000FFFF-12345678
//! tollgate -list
//! ```

use std::io::Write;

use chrono::{DateTime, Utc};

use crate::config::LicenseConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::license::{duration_from_days, License};
use crate::lifecycle::LicenseEngine;
use crate::tiers::{format_limit, LicenseType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Generate {
        license_type: String,
        organization_id: String,
        duration_days: i64,
    },
    Validate {
        key: String,
    },
    Revoke {
        key: String,
    },
    List,
    Help,
    /// No action flag was given.
    None,
}

fn flag_value(
    name: &str,
    inline: Option<&str>,
    args: &mut impl Iterator<Item = String>,
) -> LicenseResult<String> {
    match inline {
        Some(value) => Ok(value.to_string()),
        None => args
            .next()
            .ok_or_else(|| LicenseError::MalformedRequest(format!("flag needs an argument: -{name}"))),
    }
}

/// Parse arguments (without the program name).
///
/// Omitted or non-positive `-duration` falls back to `defaults`, as does an
/// omitted `-type`.
pub fn parse_args<I>(args: I, defaults: &LicenseConfig) -> LicenseResult<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();

    let mut generate = false;
    let mut list = false;
    let mut help = false;
    let mut validate = None;
    let mut revoke = None;
    let mut license_type = defaults.default_type.as_str().to_string();
    let mut organization_id = String::new();
    let mut duration_days = defaults.default_duration_days;

    while let Some(arg) = args.next() {
        let Some(flag) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) else {
            return Err(LicenseError::MalformedRequest(format!(
                "unexpected argument '{arg}'"
            )));
        };
        let (name, inline) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (flag, None),
        };

        match name {
            "generate" => generate = true,
            "list" => list = true,
            "help" | "h" => help = true,
            "validate" => validate = Some(flag_value(name, inline, &mut args)?),
            "revoke" => revoke = Some(flag_value(name, inline, &mut args)?),
            "type" => license_type = flag_value(name, inline, &mut args)?,
            "org" => organization_id = flag_value(name, inline, &mut args)?,
            "duration" => {
                let raw = flag_value(name, inline, &mut args)?;
                duration_days = raw.parse().map_err(|_| {
                    LicenseError::MalformedRequest(format!(
                        "invalid value \"{raw}\" for flag -duration"
                    ))
                })?;
            }
            other => {
                return Err(LicenseError::MalformedRequest(format!(
                    "flag provided but not defined: -{other}"
                )))
            }
        }
    }

    if duration_days <= 0 {
        duration_days = defaults.default_duration_days;
    }

    // help wins, then generate
    let command = if help {
        CliCommand::Help
    } else if generate {
        CliCommand::Generate {
            license_type,
            organization_id,
            duration_days,
        }
    } else if let Some(key) = validate {
        CliCommand::Validate { key }
    } else if let Some(key) = revoke {
        CliCommand::Revoke { key }
    } else if list {
        CliCommand::List
    } else {
        CliCommand::None
    };

    Ok(command)
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn write_details(out: &mut impl Write, license: &License) -> LicenseResult<()> {
    writeln!(out, "License ID:       {}", license.id)?;
    writeln!(out, "Type:             {}", license.license_type)?;
    writeln!(out, "Status:           {}", license.status)?;
    writeln!(out, "Created:          {}", timestamp(license.created_at))?;
    writeln!(out, "Expires:          {}", timestamp(license.expires_at))?;
    writeln!(out, "Max Users:        {}", format_limit(license.max_users))?;
    writeln!(out, "Max Workflows:    {}", format_limit(license.max_workflows))?;
    writeln!(out, "Max Executions:   {}", format_limit(license.max_executions))?;
    if !license.organization_id.is_empty() {
        writeln!(out, "Organization ID:  {}", license.organization_id)?;
    }
    Ok(())
}

fn write_usage(out: &mut impl Write) -> LicenseResult<()> {
    writeln!(out, "Tollgate license administration")?;
    writeln!(out)?;
    writeln!(out, "Usage:")?;
    writeln!(out, "  tollgate [options]")?;
    writeln!(out)?;
    writeln!(out, "Options:")?;
    writeln!(out, "  -generate            Generate a new license")?;
    writeln!(out, "  -type string         License type: basic, professional, enterprise (default: basic)")?;
    writeln!(out, "  -org string          Organization ID (optional)")?;
    writeln!(out, "  -duration int        License duration in days (default: 365)")?;
    writeln!(out, "  -validate string     Validate a license key")?;
    writeln!(out, "  -revoke string       Revoke an active license key")?;
    writeln!(out, "  -list                List all licenses")?;
    writeln!(out, "  -help                Show this help")?;
    writeln!(out)?;
    writeln!(out, "License Types:")?;
    for ty in LicenseType::ALL {
        writeln!(out, "  {:<14}- {}", ty.as_str(), ty.summary())?;
    }
    writeln!(out)?;
    writeln!(out, "The store backend is read from tollgate.toml or TOLLGATE_STORE_BACKEND.")?;
    Ok(())
}

/// Execute `command`, writing operator output to `out`.
///
/// Any error is operator-facing; the binary maps it to exit status 1.
pub async fn run(
    command: CliCommand,
    engine: &LicenseEngine,
    out: &mut impl Write,
) -> LicenseResult<()> {
    match command {
        CliCommand::Help => write_usage(out),
        CliCommand::None => Err(LicenseError::MalformedRequest(
            "Please specify an action. Use -help for more information.".to_string(),
        )),
        CliCommand::Generate {
            license_type,
            organization_id,
            duration_days,
        } => {
            let duration = duration_from_days(duration_days)?;
            writeln!(out, "Generating {license_type} license for {duration_days} days...")?;
            let license = engine
                .create(&license_type, &organization_id, duration)
                .await?;

            writeln!(out, "License generated successfully!")?;
            writeln!(out, "================================")?;
            writeln!(out, "License Key:      {}", license.key)?;
            write_details(out, &license)?;
            writeln!(out)?;
            writeln!(out, "Features:")?;
            for feature in &license.features {
                writeln!(out, "  - {feature}")?;
            }
            writeln!(out)?;
            writeln!(out, "Stored in the {} license store.", engine.store().backend())?;
            writeln!(out, "IMPORTANT: Save this license key in a secure location!")?;
            Ok(())
        }
        CliCommand::Validate { key } => {
            writeln!(out, "Validating license key: {key}")?;
            let license = engine.validate_key(&key).await?;

            writeln!(out, "License is valid!")?;
            writeln!(out, "=================")?;
            write_details(out, &license)?;
            if license.is_bound() {
                writeln!(out, "Hardware ID:      {}", license.hardware_id)?;
            }
            if let Some(activated) = license.activated_at {
                writeln!(out, "Activated:        {}", timestamp(activated))?;
            }
            writeln!(out, "Last Validated:   {}", timestamp(license.last_validated))?;
            writeln!(out, "Days Remaining:   {}", license.days_remaining(engine.now()))?;
            Ok(())
        }
        CliCommand::Revoke { key } => {
            let license = engine.revoke(&key).await?;
            writeln!(out, "License {} revoked.", license.id)?;
            Ok(())
        }
        CliCommand::List => {
            let licenses = engine.list().await?;
            if licenses.is_empty() {
                writeln!(out, "No licenses found.")?;
                return Ok(());
            }

            writeln!(out, "Found licenses:")?;
            writeln!(out, "===============")?;
            for (i, license) in licenses.iter().enumerate() {
                writeln!(out, "{}. {} ({})", i + 1, license.key, license.license_type)?;
                writeln!(out, "   Status: {}", license.status)?;
                writeln!(out, "   Expires: {}", timestamp(license.expires_at))?;
                if !license.organization_id.is_empty() {
                    writeln!(out, "   Organization: {}", license.organization_id)?;
                }
                writeln!(out)?;
            }
            writeln!(out, "Total: {} licenses", licenses.len())?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn parse(list: &[&str]) -> LicenseResult<CliCommand> {
        parse_args(args(list), &LicenseConfig::default())
    }

    #[test]
    fn generate_uses_defaults() {
        assert_eq!(
            parse(&["-generate"]).unwrap(),
            CliCommand::Generate {
                license_type: "basic".to_string(),
                organization_id: String::new(),
                duration_days: 365,
            }
        );
    }

    #[test]
    fn generate_accepts_both_dash_styles() {
        let single = parse(&["-generate", "-type", "enterprise", "-org", "org-1", "-duration", "30"]);
        let double = parse(&["--generate", "--type=enterprise", "--org", "org-1", "--duration=30"]);
        let expected = CliCommand::Generate {
            license_type: "enterprise".to_string(),
            organization_id: "org-1".to_string(),
            duration_days: 30,
        };
        assert_eq!(single.unwrap(), expected);
        assert_eq!(double.unwrap(), expected);
    }

    #[test]
    fn non_positive_duration_falls_back() {
        let cmd = parse(&["-generate", "-duration", "0"]).unwrap();
        assert!(matches!(cmd, CliCommand::Generate { duration_days: 365, .. }));
    }

    #[test]
    fn actions_and_help() {
        assert_eq!(
            parse(&["-validate", "KEY"]).unwrap(),
            CliCommand::Validate { key: "KEY".to_string() }
        );
        assert_eq!(
            parse(&["-revoke", "KEY"]).unwrap(),
            CliCommand::Revoke { key: "KEY".to_string() }
        );
        assert_eq!(parse(&["-list"]).unwrap(), CliCommand::List);
        assert_eq!(parse(&["-list", "-help"]).unwrap(), CliCommand::Help);
        assert_eq!(parse(&[]).unwrap(), CliCommand::None);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["-validate"]).is_err());
        assert!(parse(&["-duration", "soon"]).is_err());
        assert!(parse(&["-frobnicate"]).is_err());
        assert!(parse(&["generate"]).is_err());
    }
}
