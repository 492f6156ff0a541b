//! The top-level binding state.

use tracing::{debug, warn};

use crate::config::Config;
use crate::datatype::ElementKind;
use crate::error::{Error, Result};
use crate::marshal::{self, Buffer, ConversionPolicy};
use crate::registry::{CommRegistry, RequestRegistry};
use crate::substrate::Substrate;
use crate::value::Value;
use crate::ReduceOp;

/// Exit code handed to the substrate when the abort conversion policy fires.
pub const CONVERSION_ABORT_CODE: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Active,
    Finalized,
}

/// Everything the bindings keep between calls: the substrate endpoint, the
/// group and request label tables, the conversion policy and the lifecycle
/// state.
///
/// Every operation takes group and request arguments as labels and returns
/// labels, never substrate tokens.
///
/// ```
/// use tclmpi::{Context, LocalUniverse};
///
/// let universe = LocalUniverse::new(1);
/// let mut ctx = Context::new(universe.endpoint(0));
/// assert!(!ctx.initialized());
/// ctx.init().unwrap();
/// assert_eq!(ctx.comm_size("tclmpi::comm_world").unwrap(), 1);
/// ctx.finalize().unwrap();
/// assert!(ctx.finalized());
/// ```
#[derive(Debug)]
pub struct Context<S: Substrate> {
    pub(crate) substrate: S,
    pub(crate) comms: CommRegistry<S::Comm>,
    pub(crate) requests: RequestRegistry<S::Comm, S::Request>,
    policy: ConversionPolicy,
    lifecycle: Lifecycle,
    config: Config,
}

impl<S: Substrate> Context<S> {
    /// Wrap `substrate` with the default configuration.
    pub fn new(substrate: S) -> Self {
        Self::with_config(substrate, Config::default())
    }

    /// Wrap `substrate` with an explicit configuration.
    pub fn with_config(substrate: S, config: Config) -> Self {
        let comms = CommRegistry::new(
            &config.namespace,
            substrate.world(),
            substrate.self_comm(),
            substrate.null_comm(),
        );
        Context {
            requests: RequestRegistry::new(&config.namespace),
            comms,
            policy: config.conversion,
            lifecycle: Lifecycle::Uninitialized,
            config,
            substrate,
        }
    }

    /// The configuration this context was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying substrate endpoint.
    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    /// Label of the group of all processes.
    pub fn world_label(&self) -> &str {
        self.comms
            .label_of(self.substrate.world())
            .unwrap_or_default()
    }

    /// Label of the group containing only this process.
    pub fn self_label(&self) -> &str {
        self.comms
            .label_of(self.substrate.self_comm())
            .unwrap_or_default()
    }

    /// Label of the null group.
    pub fn null_label(&self) -> &str {
        self.comms
            .label_of(self.substrate.null_comm())
            .unwrap_or_default()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initialize the substrate. Only allowed once.
    pub fn init(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Uninitialized {
            return Err(Error::AlreadyInitialized);
        }
        self.substrate.init()?;
        self.lifecycle = Lifecycle::Active;
        debug!(namespace = %self.config.namespace, "initialized");
        Ok(())
    }

    /// Shut the substrate down. Only allowed once, after [`init`](Self::init).
    pub fn finalize(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Uninitialized => return Err(Error::FinalizeBeforeInit),
            Lifecycle::Finalized => return Err(Error::AlreadyFinalized),
            Lifecycle::Active => {}
        }
        let pending = self.requests.len();
        if pending != 0 {
            warn!(pending, "finalizing with requests in flight");
        }
        self.substrate.finalize()?;
        self.lifecycle = Lifecycle::Finalized;
        debug!("finalized");
        Ok(())
    }

    /// True once [`init`](Self::init) has succeeded.
    pub fn initialized(&self) -> bool {
        self.lifecycle != Lifecycle::Uninitialized
    }

    /// True once [`finalize`](Self::finalize) has succeeded.
    pub fn finalized(&self) -> bool {
        self.lifecycle == Lifecycle::Finalized
    }

    /// Terminate the whole computation with `code`.
    pub fn abort(&mut self, comm: &str, code: i32) -> Result<()> {
        let comm = self.resolve(comm)?;
        warn!(code, "abort requested");
        self.substrate.abort(comm, code)
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Active => Ok(()),
            Lifecycle::Uninitialized => Err(Error::NotInitialized),
            Lifecycle::Finalized => Err(Error::AlreadyFinalized),
        }
    }

    /// Check the lifecycle and resolve a group label.
    pub(crate) fn resolve(&self, label: &str) -> Result<S::Comm> {
        self.ensure_active()?;
        self.comms
            .resolve(label)
            .ok_or_else(|| Error::UnknownCommunicator(label.to_string()))
    }

    pub(crate) fn is_null(&self, comm: S::Comm) -> bool {
        comm == self.substrate.null_comm()
    }

    // ========================================================================
    // Conversion policy
    // ========================================================================

    /// Set the conversion policy by name (`tclmpi::error`, `tclmpi::tozero`
    /// or `tclmpi::abort`).
    pub fn conv_set(&mut self, name: &str) -> Result<()> {
        let policy = name.parse()?;
        self.set_policy(policy);
        Ok(())
    }

    /// Name of the current conversion policy.
    pub fn conv_get(&self) -> &'static str {
        self.policy.name()
    }

    /// Set the conversion policy.
    pub fn set_policy(&mut self, policy: ConversionPolicy) {
        debug!(%policy, "conversion policy changed");
        self.policy = policy;
    }

    /// Current conversion policy.
    pub fn policy(&self) -> ConversionPolicy {
        self.policy
    }

    /// Encode under the current policy, aborting the job through `comm` if
    /// the abort policy is in effect and an element does not convert.
    pub(crate) fn encode(&mut self, value: &Value, kind: ElementKind, comm: S::Comm) -> Result<Buffer> {
        match marshal::encode(value, kind, self.policy) {
            Err(err @ Error::Conversion { .. }) if self.policy == ConversionPolicy::Abort => {
                warn!(%err, "conversion failed, aborting");
                self.substrate.abort(comm, CONVERSION_ABORT_CODE)?;
                Err(Error::Aborted(CONVERSION_ABORT_CODE))
            }
            other => other,
        }
    }

    /// Reduce one integer over `comm`.
    pub(crate) fn allreduce_int(&mut self, local: i32, op: ReduceOp, comm: S::Comm) -> Result<i32> {
        let send = Buffer::from_int(local);
        let mut recv = Buffer::zeroed(ElementKind::Int, 1);
        self.substrate
            .allreduce(send.as_bytes(), recv.as_bytes_mut(), ElementKind::Int, op, comm)?;
        recv.ints()
            .first()
            .copied()
            .ok_or_else(|| Error::Internal("empty reduction result".into()))
    }

    /// Broadcast one integer from `root` over `comm`.
    pub(crate) fn bcast_int(&mut self, value: i32, root: i32, comm: S::Comm) -> Result<i32> {
        let mut buf = Buffer::from_int(value);
        self.substrate
            .bcast(buf.as_bytes_mut(), ElementKind::Int, root, comm)?;
        buf.ints()
            .first()
            .copied()
            .ok_or_else(|| Error::Internal("empty broadcast result".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalUniverse;

    #[test]
    fn lifecycle_sequencing() {
        let universe = LocalUniverse::new(1);
        let mut ctx = Context::new(universe.endpoint(0));

        assert!(matches!(ctx.finalize(), Err(Error::FinalizeBeforeInit)));
        assert!(matches!(ctx.comm_size("tclmpi::comm_world"), Err(Error::NotInitialized)));

        ctx.init().unwrap();
        assert!(ctx.initialized() && !ctx.finalized());
        let err = ctx.init().unwrap_err();
        assert_eq!(err.to_string(), "calling init multiple times is erroneous");

        ctx.finalize().unwrap();
        assert!(ctx.finalized());
        assert!(matches!(ctx.finalize(), Err(Error::AlreadyFinalized)));
        assert!(matches!(ctx.init(), Err(Error::AlreadyInitialized)));
        assert!(matches!(ctx.barrier("tclmpi::comm_world"), Err(Error::AlreadyFinalized)));
    }

    #[test]
    fn conversion_policy_round_trip() {
        let universe = LocalUniverse::new(1);
        let mut ctx = Context::new(universe.endpoint(0));
        assert_eq!(ctx.conv_get(), "tclmpi::error");
        ctx.conv_set("tclmpi::tozero").unwrap();
        assert_eq!(ctx.conv_get(), "tclmpi::tozero");
        assert!(matches!(ctx.conv_set("tclmpi::bogus"), Err(Error::UnknownPolicy(_))));
        assert_eq!(ctx.policy(), ConversionPolicy::ToZero);
    }

    #[test]
    fn configured_namespace_and_policy() {
        let universe = LocalUniverse::new(1);
        let config = Config {
            namespace: "app".into(),
            conversion: ConversionPolicy::ToZero,
        };
        let mut ctx = Context::with_config(universe.endpoint(0), config);
        ctx.init().unwrap();
        assert_eq!(ctx.world_label(), "app::comm_world");
        assert_eq!(ctx.self_label(), "app::comm_self");
        assert_eq!(ctx.null_label(), "app::comm_null");
        assert_eq!(ctx.conv_get(), "tclmpi::tozero");
        assert!(matches!(
            ctx.comm_rank("tclmpi::comm_world"),
            Err(Error::UnknownCommunicator(_))
        ));
    }

    #[test]
    fn explicit_abort_reaches_substrate() {
        let universe = LocalUniverse::new(1);
        let mut ctx = Context::new(universe.endpoint(0));
        ctx.init().unwrap();
        ctx.abort("tclmpi::comm_world", 5).unwrap();
        assert_eq!(universe.aborted(), Some(5));
        assert_eq!(universe.abort_count(), 1);
    }
}
