//! First-boot scripts for the compute fleets
//!
//! `builtin:<name>` selects one of the scripts below; anything else is a path
//! relative to the project root. Both are rendered with the template processor
//! so they can use the tier ports.

use crate::error::{Result, TopologyError};
use crate::model::{BootstrapScript, FleetSpec, Tier, Topology};
use crate::template::TemplateProcessor;
use std::path::Path;
use tracing::debug;

/// Web tier placeholder: serves a health page on the target port
pub const WEB_SETUP: &str = r#"#!/bin/bash
# tierflow: web tier bootstrap ({{ project }})
set -e

mkdir -p /var/www/tierflow
echo "ok" > /var/www/tierflow/health
echo "{{ project }} web tier" > /var/www/tierflow/index.html

cd /var/www/tierflow
nohup python3 -m http.server {{ target_port }} > /var/log/tierflow-web.log 2>&1 &
"#;

/// App tier placeholder: listens on the app port
pub const APP_SETUP: &str = r#"#!/bin/bash
# tierflow: app tier bootstrap ({{ project }})
set -e

mkdir -p /opt/tierflow
echo "{{ project }} app tier" > /opt/tierflow/index.html

cd /opt/tierflow
nohup python3 -m http.server {{ app_port }} > /var/log/tierflow-app.log 2>&1 &
"#;

pub fn get_builtin_script(name: &str) -> Option<&'static str> {
    match name {
        "web" => Some(WEB_SETUP),
        "app" => Some(APP_SETUP),
        _ => None,
    }
}

pub fn is_builtin_script(name: &str) -> bool {
    get_builtin_script(name).is_some()
}

/// Fill `user_data` of the web and app fleets from their bootstrap references
pub fn resolve(topology: &mut Topology, project_root: &Path) -> Result<()> {
    let mut processor = TemplateProcessor::new();
    processor.add_variable("project", serde_json::json!(topology.settings.prefix()));
    processor.add_variable("target_port", serde_json::json!(topology.web.target_port));
    processor.add_variable("app_port", serde_json::json!(topology.app.port));
    processor.add_variable(
        "db_port",
        serde_json::json!(topology.data.effective_port()),
    );

    resolve_fleet(&mut topology.web.fleet, Tier::Web, project_root, &mut processor)?;
    resolve_fleet(&mut topology.app.fleet, Tier::App, project_root, &mut processor)?;
    Ok(())
}

fn resolve_fleet(
    fleet: &mut FleetSpec,
    tier: Tier,
    project_root: &Path,
    processor: &mut TemplateProcessor,
) -> Result<()> {
    let Some(script) = &fleet.bootstrap else {
        return Ok(());
    };

    let rendered = match script {
        BootstrapScript::Builtin(name) => {
            let template = get_builtin_script(name)
                .ok_or_else(|| TopologyError::BootstrapNotFound(script.to_string()))?;
            processor.render_str(template)?
        }
        BootstrapScript::File(path) => {
            let full = project_root.join(path);
            if !full.is_file() {
                return Err(TopologyError::BootstrapNotFound(full.display().to_string()));
            }
            processor.render_file(&full)?
        }
    };

    debug!(tier = %tier, script = %script, bytes = rendered.len(), "Resolved bootstrap script");
    fleet.user_data = Some(rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> Topology {
        let mut topology = Topology::default();
        topology.settings.project = "shop".to_string();
        topology.web.target_port = 8081;
        topology.app.port = 9000;
        topology
    }

    #[test]
    fn test_builtin_scripts_use_tier_ports() {
        let mut topology = topology();
        topology.web.fleet.bootstrap = Some(BootstrapScript::parse("builtin:web"));
        topology.app.fleet.bootstrap = Some(BootstrapScript::parse("builtin:app"));

        resolve(&mut topology, Path::new("/nonexistent")).unwrap();

        let web = topology.web.fleet.user_data.unwrap();
        assert!(web.starts_with("#!/bin/bash"));
        assert!(web.contains("http.server 8081"));
        let app = topology.app.fleet.user_data.unwrap();
        assert!(app.contains("http.server 9000"));
        assert!(app.contains("shop app tier"));
    }

    #[test]
    fn test_unknown_builtin_is_rejected() {
        let mut topology = topology();
        topology.web.fleet.bootstrap = Some(BootstrapScript::parse("builtin:nginx"));

        let err = resolve(&mut topology, Path::new("/nonexistent")).unwrap_err();
        assert!(matches!(err, TopologyError::BootstrapNotFound(ref name) if name == "builtin:nginx"));
    }

    #[test]
    fn test_file_script_relative_to_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("scripts")).unwrap();
        std::fs::write(
            temp_dir.path().join("scripts/app.sh"),
            "#!/bin/sh\nexec /opt/app --port {{ app_port }} --db-port {{ db_port }}\n",
        )
        .unwrap();

        let mut topology = topology();
        topology.app.fleet.bootstrap = Some(BootstrapScript::parse("scripts/app.sh"));
        resolve(&mut topology, temp_dir.path()).unwrap();

        assert_eq!(
            topology.app.fleet.user_data.as_deref(),
            Some("#!/bin/sh\nexec /opt/app --port 9000 --db-port 5432\n")
        );
        assert!(topology.web.fleet.user_data.is_none());
    }

    #[test]
    fn test_missing_file_script() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut topology = topology();
        topology.web.fleet.bootstrap = Some(BootstrapScript::parse("scripts/missing.sh"));

        let result = resolve(&mut topology, temp_dir.path());
        assert!(matches!(result, Err(TopologyError::BootstrapNotFound(_))));
    }

    #[test]
    fn test_builtin_lookup() {
        assert!(is_builtin_script("web"));
        assert!(is_builtin_script("app"));
        assert!(!is_builtin_script("data"));
    }
}
