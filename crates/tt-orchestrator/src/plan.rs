//! Which tunnels a profile needs

use tt_core::config::TargetProfile;
use tt_core::{OrchestratorError, SshTarget, TunnelId, TunnelSpec};

use crate::policy::PortPlan;

/// Tunnels and ports for one connection attempt
#[derive(Debug, Clone)]
pub struct ConnectionPlan {
    pub ports: PortPlan,
    /// Control first, then files when requested
    pub tunnels: Vec<TunnelSpec>,
}

impl ConnectionPlan {
    /// Derive the plan for `profile`, dialing `target`
    pub fn for_profile(profile: &TargetProfile, target: &SshTarget) -> Result<Self, OrchestratorError> {
        let ports = PortPlan::for_control_port(profile.control_port).ok_or_else(|| {
            OrchestratorError::InvalidProfile(format!(
                "control port {} leaves no room for the derived forward ports",
                profile.control_port
            ))
        })?;
        let use_overlay = profile.requires_overlay();

        let mut tunnels = vec![TunnelSpec {
            id: TunnelId::control(),
            remote_address: format!("{}:{}", profile.control_host, ports.control),
            local_address: format!("127.0.0.1:{}", ports.local_control),
            target: target.clone(),
            use_overlay,
            essential: true,
        }];

        if profile.file_server {
            tunnels.push(TunnelSpec {
                id: TunnelId::files(),
                remote_address: format!("127.0.0.1:{}", ports.remote_daemon),
                local_address: format!("127.0.0.1:{}", ports.local_daemon),
                target: target.clone(),
                use_overlay,
                essential: false,
            });
        }

        Ok(Self { ports, tunnels })
    }

    /// The control tunnel
    pub fn control(&self) -> Option<&TunnelSpec> {
        self.tunnels.iter().find(|t| t.id.as_str() == TunnelId::CONTROL)
    }

    /// Whether the file daemon must be provisioned
    pub fn wants_file_server(&self) -> bool {
        self.tunnels.iter().any(|t| t.id.as_str() == TunnelId::FILES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tt_core::config::OverlayMode;
    use tt_core::Credential;

    fn target() -> SshTarget {
        SshTarget {
            endpoint: "seedbox:22".to_string(),
            proxy: None,
            username: "adam".to_string(),
            credential: Credential::Password("pw".to_string()),
            host_key: None,
        }
    }

    #[test]
    fn test_control_only_plan() {
        let profile = TargetProfile::new("seedbox");
        let plan = ConnectionPlan::for_profile(&profile, &target()).unwrap();

        assert_eq!(plan.tunnels.len(), 1);
        let control = plan.control().unwrap();
        assert_eq!(control.remote_address, "127.0.0.1:9091");
        assert_eq!(control.local_address, "127.0.0.1:17091");
        assert!(control.essential);
        assert!(!control.use_overlay);
        assert!(!plan.wants_file_server());
    }

    #[test]
    fn test_file_server_plan() {
        let mut profile = TargetProfile::new("seedbox");
        profile.file_server = true;
        profile.overlay = OverlayMode::Required;
        let plan = ConnectionPlan::for_profile(&profile, &target()).unwrap();

        let files = &plan.tunnels[1];
        assert_eq!(files.id, TunnelId::files());
        assert_eq!(files.remote_address, "127.0.0.1:19091");
        assert_eq!(files.local_address, "127.0.0.1:27091");
        assert!(!files.essential);
        assert!(plan.tunnels.iter().all(|t| t.use_overlay));
    }

    #[test]
    fn test_port_overflow_is_invalid() {
        let mut profile = TargetProfile::new("seedbox");
        profile.control_port = 60000;
        assert!(matches!(
            ConnectionPlan::for_profile(&profile, &target()),
            Err(OrchestratorError::InvalidProfile(_))
        ));
    }
}
