use super::{Script, Step};
use crate::namespace::MountPlan;
use crate::script::EnvFilter;
use std::path::Path;

/// Build `enter-chroot`.
///
/// `emulator` is exported as `QEMU_EMULATOR` before the environment
/// snapshot, so it reaches the chroot when the filter keeps it.
pub fn enter_script(plan: &MountPlan, filter: &EnvFilter, emulator: Option<&Path>) -> Script {
    let mut script = Script::new()
        .step(Step::ExitOnError)
        .step(Step::ParseUser)
        .step(Step::SaveWorkingDir)
        .step(Step::DetectPrivilege);

    if let Some(emulator) = emulator {
        script = script.step(Step::Export {
            name: "QEMU_EMULATOR".to_string(),
            value: emulator.to_string_lossy().into_owned(),
        });
    }

    script = script
        .step(Step::SnapshotEnv(filter.clone()))
        .step(Step::EnterScriptDir);
    for binding in plan.bindings() {
        script = script.step(Step::EnsureMount(binding.clone()));
    }

    script.step(Step::InstallSnapshot).step(Step::ChrootExec)
}
