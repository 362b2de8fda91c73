//! Capability handling for the namespaced child.

use std::str::FromStr;

use anyhow::Result;
use caps::{Capability, CapSet, CapsHashSet};

use crate::error::Error;
use crate::syscall::Syscall;

/// Parses configured capability names into a set. Accepts both the
/// `CAP_SYS_ADMIN` and the bare `SYS_ADMIN` spelling; unknown names are
/// a configuration error.
pub fn to_set(names: &[String]) -> Result<CapsHashSet, Error> {
    let mut capabilities = CapsHashSet::new();
    for name in names {
        let canonical = if name.starts_with("CAP_") {
            name.to_string()
        } else {
            format!("CAP_{}", name)
        };
        let cap = Capability::from_str(&canonical)
            .map_err(|_| Error::ConfigInvalid(format!("unknown capability: {}", name)))?;
        capabilities.insert(cap);
    }
    Ok(capabilities)
}

/// Resets the effective set to everything currently permitted. Used
/// after an identity change so the process can finish its setup.
pub fn reset_effective(syscall: &dyn Syscall) -> Result<()> {
    log::debug!("reset all caps");
    syscall.set_capability(CapSet::Effective, &caps::all())?;
    Ok(())
}

/// Drops every capability not in `names`, across the bounding,
/// inheritable and effective sets. The permitted set follows the
/// bounding drop on exec.
pub fn drop_privileges(names: &[String], syscall: &dyn Syscall) -> Result<()> {
    let keep = to_set(names)?;
    log::debug!("dropping bounding capabilities to {:?}", keep);
    syscall.set_capability(CapSet::Bounding, &keep)?;
    syscall.set_capability(CapSet::Inheritable, &keep)?;
    syscall.set_capability(CapSet::Effective, &keep)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::TestHelperSyscall;

    #[test]
    fn test_to_set_accepts_both_spellings() {
        let set = to_set(&["CAP_CHOWN".to_string(), "NET_RAW".to_string()]).unwrap();
        assert!(set.contains(&Capability::CAP_CHOWN));
        assert!(set.contains(&Capability::CAP_NET_RAW));
    }

    #[test]
    fn test_to_set_unknown_name() {
        assert!(matches!(
            to_set(&["TELEPORT".to_string()]),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_drop_privileges_sets_all_three_sets() {
        let syscall = TestHelperSyscall::default();
        drop_privileges(&["CAP_KILL".to_string()], &syscall).unwrap();

        let args = syscall.get_set_capability_args();
        let sets: Vec<CapSet> = args.iter().map(|(cset, _)| *cset).collect();
        assert_eq!(
            sets,
            vec![CapSet::Bounding, CapSet::Inheritable, CapSet::Effective]
        );
        for (_, caps) in args {
            assert_eq!(caps.len(), 1);
            assert!(caps.contains(&Capability::CAP_KILL));
        }
    }
}
