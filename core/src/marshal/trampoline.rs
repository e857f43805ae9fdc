//! Callback trampolines: native code that turns a C-ABI call into an
//! Epoch function invocation.
//!
//! Every trampoline is stamped out of a [`TrampolineTemplate`] for the host
//! ABI. The template spills the argument registers to the stack and calls
//! [`callback_entry`] with three hard-coded immediates: the owning context's
//! [`CallbackAnchor`], the callback's function handle and the entry stub
//! address. Trampolines live in fixed-size slots of executable pages that
//! are mapped on demand and released with their context.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};

use anyhow::{Result, anyhow, bail};
use once_cell::sync::Lazy;
use tracing::trace;

use crate::heap::StringHandle;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::vm::{ExecutionContext, panic_message};

use super::Unsupported;

pub const TRAMPOLINE_SLOT_SIZE: usize = 64;
pub const TRAMPOLINE_PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetAbi {
    /// x86-64 System V: integer arguments in rdi, rsi, rdx, rcx, r8, r9.
    SysV64,
}

impl TargetAbi {
    /// ABI of the running process, if trampolines are supported on it.
    pub fn host() -> Option<TargetAbi> {
        if cfg!(all(target_arch = "x86_64", unix)) {
            Some(TargetAbi::SysV64)
        } else {
            None
        }
    }
}

/// Machine code with three 64-bit immediates patched in per trampoline.
#[derive(Debug, Clone)]
pub struct TrampolineTemplate {
    pub abi: TargetAbi,
    pub version: u32,
    pub code: &'static [u8],
    pub anchor_at: usize,
    pub handle_at: usize,
    pub stub_at: usize,
    /// Register arguments the template forwards to the stub.
    pub max_args: usize,
}

/// ```text
///  0  55                push rbp
///  1  48 89 e5          mov rbp, rsp
///  4  41 51             push r9
///  6  41 50             push r8
///  8  51                push rcx
///  9  52                push rdx
/// 10  56                push rsi
/// 11  57                push rdi            ; rsp -> [rdi, rsi, rdx, rcx, r8, r9]
/// 12  48 89 e2          mov rdx, rsp        ; args
/// 15  48 bf <imm64>     movabs rdi, anchor
/// 25  48 be <imm64>     movabs rsi, handle
/// 35  48 b8 <imm64>     movabs rax, stub
/// 45  ff d0             call rax
/// 47  c9                leave
/// 48  c3                ret
/// ```
const SYSV64_V1: [u8; 49] = [
    0x55, 0x48, 0x89, 0xe5, 0x41, 0x51, 0x41, 0x50, 0x51, 0x52, 0x56, 0x57, 0x48, 0x89, 0xe2, 0x48, 0xbf, 0, 0, 0, 0,
    0, 0, 0, 0, 0x48, 0xbe, 0, 0, 0, 0, 0, 0, 0, 0, 0x48, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xd0, 0xc9, 0xc3,
];

static TEMPLATES: Lazy<FastHashMap<TargetAbi, TrampolineTemplate>> = Lazy::new(|| {
    let mut templates = fast_hash_map_new();
    templates.insert(
        TargetAbi::SysV64,
        TrampolineTemplate {
            abi: TargetAbi::SysV64,
            version: 1,
            code: &SYSV64_V1,
            anchor_at: 17,
            handle_at: 27,
            stub_at: 37,
            max_args: 6,
        },
    );
    templates
});

impl TrampolineTemplate {
    pub fn for_abi(abi: TargetAbi) -> Option<&'static TrampolineTemplate> {
        TEMPLATES.get(&abi)
    }

    /// The single emission routine: copies the template and patches the
    /// anchor, handle and stub immediates.
    pub fn emit(&self, anchor: u64, handle: u64, stub: u64) -> Vec<u8> {
        let mut code = self.code.to_vec();
        code[self.anchor_at..self.anchor_at + 8].copy_from_slice(&anchor.to_le_bytes());
        code[self.handle_at..self.handle_at + 8].copy_from_slice(&handle.to_le_bytes());
        code[self.stub_at..self.stub_at + 8].copy_from_slice(&stub.to_le_bytes());
        code
    }
}

/// Links trampolines back to the context that is inside a native call.
///
/// The context pointer is only set while an outbound call is in flight.
#[derive(Debug)]
pub struct CallbackAnchor {
    context: Cell<*mut ()>,
    failure: RefCell<Option<String>>,
}

impl CallbackAnchor {
    /// Points the anchor at `context`, returning the previous binding so
    /// nested outbound calls can restore it.
    pub(crate) fn bind(&self, context: *mut ()) -> *mut () {
        self.context.replace(context)
    }

    /// Restores `previous` and hands back the first callback failure
    /// recorded since the matching `bind`.
    pub(crate) fn release(&self, previous: *mut ()) -> Option<String> {
        self.context.set(previous);
        self.failure.borrow_mut().take()
    }

    fn record_failure(&self, message: String) {
        self.failure.borrow_mut().get_or_insert(message);
    }
}

impl Default for CallbackAnchor {
    fn default() -> Self {
        Self {
            context: Cell::new(std::ptr::null_mut()),
            failure: RefCell::new(None),
        }
    }
}

/// Entry stub every trampoline calls. Failures never unwind into native
/// code: they are parked in the anchor and the native caller sees 0.
pub(crate) extern "C" fn callback_entry(anchor: *const CallbackAnchor, handle: u64, args: *const u64) -> u64 {
    // SAFETY: trampolines embed the address of an anchor boxed inside the
    // context that owns them, so it outlives every trampoline call.
    let anchor = unsafe { &*anchor };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<u64> {
        let context = anchor.context.get();
        if context.is_null() {
            bail!("callback invoked outside of a native call");
        }
        // SAFETY: the pointer was bound by `call_external` on this thread and
        // that frame is suspended in the native call until we return.
        let context = unsafe { &mut *context.cast::<ExecutionContext<'static>>() };
        context.run_callback(StringHandle(handle as u32), args)
    }));
    match outcome {
        Ok(Ok(word)) => word,
        Ok(Err(err)) => {
            anchor.record_failure(format!("{:#}", err));
            0
        }
        Err(payload) => {
            anchor.record_failure(panic_message(payload.as_ref()));
            0
        }
    }
}

/// Trampoline storage of one context.
pub(crate) struct CallbackRegistry {
    anchor: Box<CallbackAnchor>,
    trampolines: FastHashMap<StringHandle, usize>,
    pages: ExecutablePages,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        Self {
            anchor: Box::new(CallbackAnchor::default()),
            trampolines: fast_hash_map_new(),
            pages: ExecutablePages::default(),
        }
    }

    #[inline]
    pub(crate) fn anchor(&self) -> &CallbackAnchor {
        &self.anchor
    }

    /// Native address that calls function `handle`, emitted on first use.
    pub(crate) fn trampoline_for(&mut self, handle: StringHandle) -> Result<usize> {
        if let Some(address) = self.trampolines.get(&handle) {
            return Ok(*address);
        }
        let template = TargetAbi::host()
            .and_then(TrampolineTemplate::for_abi)
            .ok_or_else(|| anyhow!(Unsupported("callbacks on this target".to_string())))?;
        let anchor: *const CallbackAnchor = &*self.anchor;
        let stub = callback_entry as extern "C" fn(*const CallbackAnchor, u64, *const u64) -> u64;
        let code = template.emit(anchor as u64, u64::from(handle.raw()), stub as usize as u64);
        let address = self.pages.install(&code)?;
        trace!(target: "epoch::marshal", %handle, address, version = template.version, "emitted trampoline");
        self.trampolines.insert(handle, address);
        Ok(address)
    }

    pub(crate) fn len(&self) -> usize {
        self.trampolines.len()
    }
}

/// Pages of trampoline slots. A page is writable only while a slot is
/// being filled and executable otherwise.
#[derive(Default)]
struct ExecutablePages {
    pages: Vec<usize>,
    used_in_last: usize,
}

impl ExecutablePages {
    const SLOTS_PER_PAGE: usize = TRAMPOLINE_PAGE_SIZE / TRAMPOLINE_SLOT_SIZE;

    fn install(&mut self, code: &[u8]) -> Result<usize> {
        if code.len() > TRAMPOLINE_SLOT_SIZE {
            bail!("trampoline of {} bytes does not fit a {}-byte slot", code.len(), TRAMPOLINE_SLOT_SIZE);
        }
        if self.pages.is_empty() || self.used_in_last == Self::SLOTS_PER_PAGE {
            self.pages.push(map_page()?);
            self.used_in_last = 0;
        }
        let page = *self
            .pages
            .last()
            .ok_or_else(|| anyhow!("no trampoline page mapped"))?;
        let slot = page + self.used_in_last * TRAMPOLINE_SLOT_SIZE;
        write_slot(page, slot, code)?;
        self.used_in_last += 1;
        Ok(slot)
    }
}

impl Drop for ExecutablePages {
    fn drop(&mut self) {
        for page in self.pages.drain(..) {
            unmap_page(page);
        }
    }
}

#[cfg(unix)]
fn map_page() -> Result<usize> {
    // SAFETY: anonymous private mapping, no file descriptor involved.
    let page = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            TRAMPOLINE_PAGE_SIZE,
            libc::PROT_READ | libc::PROT_EXEC,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if page == libc::MAP_FAILED {
        bail!("cannot map trampoline page: {}", std::io::Error::last_os_error());
    }
    Ok(page as usize)
}

#[cfg(unix)]
fn write_slot(page: usize, slot: usize, code: &[u8]) -> Result<()> {
    let protect = |flags: libc::c_int| -> Result<()> {
        // SAFETY: `page` is a live mapping of TRAMPOLINE_PAGE_SIZE bytes.
        if unsafe { libc::mprotect(page as *mut libc::c_void, TRAMPOLINE_PAGE_SIZE, flags) } != 0 {
            bail!("cannot change trampoline page protection: {}", std::io::Error::last_os_error());
        }
        Ok(())
    };
    protect(libc::PROT_READ | libc::PROT_WRITE)?;
    // SAFETY: the slot lies inside the page, which is writable now.
    unsafe { std::ptr::copy_nonoverlapping(code.as_ptr(), slot as *mut u8, code.len()) };
    protect(libc::PROT_READ | libc::PROT_EXEC)
}

#[cfg(unix)]
fn unmap_page(page: usize) {
    // SAFETY: pages come from `map_page` and are unmapped once.
    unsafe {
        libc::munmap(page as *mut libc::c_void, TRAMPOLINE_PAGE_SIZE);
    }
}

#[cfg(not(unix))]
fn map_page() -> Result<usize> {
    bail!(Unsupported("executable trampoline pages on this platform".to_string()))
}

#[cfg(not(unix))]
fn write_slot(_page: usize, _slot: usize, _code: &[u8]) -> Result<()> {
    bail!(Unsupported("executable trampoline pages on this platform".to_string()))
}

#[cfg(not(unix))]
fn unmap_page(_page: usize) {}
