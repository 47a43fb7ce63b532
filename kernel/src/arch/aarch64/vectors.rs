//! Exception vector table and context trampolines
//!
//! Each vector saves the interrupted register state as a [`Context`] frame
//! on the EL1 stack and hands a pointer to it to the Rust dispatch entry
//! for its class. The dispatcher returns the context to resume (not
//! necessarily the one that was interrupted) and the stub reloads it and
//! returns from the exception. The frame layout is pinned by the offset
//! constants in [`super::context`].

use super::context::Context;

extern "C" {
    /// Reload `ctx` and return to the mode it was captured in.
    pub fn load_context(ctx: *const Context) -> !;

    /// Base of the vector table, installed into VBAR_EL1 at boot.
    pub static vector_table_el1: u8;
}

core::arch::global_asm!(
    r#"
.macro save_context
    sub     sp, sp, #816
    stp     x0, x1, [sp, #512]
    stp     x2, x3, [sp, #528]
    stp     x4, x5, [sp, #544]
    stp     x6, x7, [sp, #560]
    stp     x8, x9, [sp, #576]
    stp     x10, x11, [sp, #592]
    stp     x12, x13, [sp, #608]
    stp     x14, x15, [sp, #624]
    stp     x16, x17, [sp, #640]
    stp     x18, x19, [sp, #656]
    stp     x20, x21, [sp, #672]
    stp     x22, x23, [sp, #688]
    stp     x24, x25, [sp, #704]
    stp     x26, x27, [sp, #720]
    stp     x28, x29, [sp, #736]
    str     x30, [sp, #752]
    stp     q0, q1, [sp, #0]
    stp     q2, q3, [sp, #32]
    stp     q4, q5, [sp, #64]
    stp     q6, q7, [sp, #96]
    stp     q8, q9, [sp, #128]
    stp     q10, q11, [sp, #160]
    stp     q12, q13, [sp, #192]
    stp     q14, q15, [sp, #224]
    stp     q16, q17, [sp, #256]
    stp     q18, q19, [sp, #288]
    stp     q20, q21, [sp, #320]
    stp     q22, q23, [sp, #352]
    stp     q24, q25, [sp, #384]
    stp     q26, q27, [sp, #416]
    stp     q28, q29, [sp, #448]
    stp     q30, q31, [sp, #480]
    mrs     x9, SP_EL0
    str     x9, [sp, #760]
    mrs     x9, ELR_EL1
    str     x9, [sp, #768]
    mrs     x9, SPSR_EL1
    str     x9, [sp, #776]
    mrs     x9, FPCR
    str     x9, [sp, #784]
    mrs     x9, FPSR
    str     x9, [sp, #792]
    add     x9, sp, #816
    str     x9, [sp, #800]
.endm

__vec_sync:
    save_context
    mov     x0, sp
    bl      vector_sync
    b       load_context

__vec_irq:
    save_context
    mov     x0, sp
    bl      vector_irq
    b       load_context

__vec_invalid:
    mrs     x0, ESR_EL1
    mrs     x1, ELR_EL1
    bl      vector_invalid

// Reload the context at x0 and leave the exception. The EL1 stack pointer
// is reset to the context's kernel stack, so frames abandoned by a context
// switch are reclaimed implicitly.
.global load_context
load_context:
    ldr     x9, [x0, #800]
    mov     sp, x9
    ldr     x9, [x0, #760]
    msr     SP_EL0, x9
    ldr     x9, [x0, #768]
    msr     ELR_EL1, x9
    ldr     x9, [x0, #776]
    msr     SPSR_EL1, x9
    ldr     x9, [x0, #784]
    msr     FPCR, x9
    ldr     x9, [x0, #792]
    msr     FPSR, x9
    ldp     q0, q1, [x0, #0]
    ldp     q2, q3, [x0, #32]
    ldp     q4, q5, [x0, #64]
    ldp     q6, q7, [x0, #96]
    ldp     q8, q9, [x0, #128]
    ldp     q10, q11, [x0, #160]
    ldp     q12, q13, [x0, #192]
    ldp     q14, q15, [x0, #224]
    ldp     q16, q17, [x0, #256]
    ldp     q18, q19, [x0, #288]
    ldp     q20, q21, [x0, #320]
    ldp     q22, q23, [x0, #352]
    ldp     q24, q25, [x0, #384]
    ldp     q26, q27, [x0, #416]
    ldp     q28, q29, [x0, #448]
    ldp     q30, q31, [x0, #480]
    ldp     x2, x3, [x0, #528]
    ldp     x4, x5, [x0, #544]
    ldp     x6, x7, [x0, #560]
    ldp     x8, x9, [x0, #576]
    ldp     x10, x11, [x0, #592]
    ldp     x12, x13, [x0, #608]
    ldp     x14, x15, [x0, #624]
    ldp     x16, x17, [x0, #640]
    ldp     x18, x19, [x0, #656]
    ldp     x20, x21, [x0, #672]
    ldp     x22, x23, [x0, #688]
    ldp     x24, x25, [x0, #704]
    ldp     x26, x27, [x0, #720]
    ldp     x28, x29, [x0, #736]
    ldr     x30, [x0, #752]
    ldr     x1, [x0, #520]
    ldr     x0, [x0, #512]
    eret

.balign 0x800
.global vector_table_el1
vector_table_el1:
// Current EL with SP_EL0 - never used.
.balign 0x80
    b       __vec_invalid
.balign 0x80
    b       __vec_invalid
.balign 0x80
    b       __vec_invalid
.balign 0x80
    b       __vec_invalid
// Current EL with SP_ELx - kernel-mode faults (demand fill) and masked IRQs.
.balign 0x80
    b       __vec_sync
.balign 0x80
    b       __vec_irq
.balign 0x80
    b       __vec_invalid
.balign 0x80
    b       __vec_invalid
// Lower EL, AArch64 - syscalls, user faults, preemption.
.balign 0x80
    b       __vec_sync
.balign 0x80
    b       __vec_irq
.balign 0x80
    b       __vec_invalid
.balign 0x80
    b       __vec_invalid
// Lower EL, AArch32.
.balign 0x80
    b       __vec_sync
.balign 0x80
    b       __vec_irq
.balign 0x80
    b       __vec_invalid
.balign 0x80
    b       __vec_invalid
"#
);
