/*----------------------------------------------------------------------
  Lua 5.1 instruction format

  All instructions are unsigned 32-bit words with a 6-bit opcode in the
  low bits.

        3 3 2 2 2 2 2 2 2 2 2 2 1 1 1 1 1 1 1 1 1 1 0 0 0 0 0 0 0 0 0 0
        1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0
  iABC        B(9)       |       C(9)        |     A(8)      |  Op(6)    |
  iABx                 Bx(18)                |     A(8)      |  Op(6)    |
  iAsBx           sBx (signed)(18)           |     A(8)      |  Op(6)    |

  sBx is stored in excess-K form with K = MAXARG_sBx (131071).
  An RK operand with bit 8 set names constant (RK & 0xFF), otherwise a
  register.
----------------------------------------------------------------------*/

use super::OpCode;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Instruction(u32);

impl Instruction {
    #[inline(always)]
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    #[inline(always)]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const SIZE_OP: u32 = 6;
    pub const SIZE_A: u32 = 8;
    pub const SIZE_B: u32 = 9;
    pub const SIZE_C: u32 = 9;
    pub const SIZE_BX: u32 = Self::SIZE_B + Self::SIZE_C; // 18

    pub const POS_OP: u32 = 0;
    pub const POS_A: u32 = Self::POS_OP + Self::SIZE_OP;
    pub const POS_C: u32 = Self::POS_A + Self::SIZE_A;
    pub const POS_B: u32 = Self::POS_C + Self::SIZE_C;
    pub const POS_BX: u32 = Self::POS_C;

    pub const MAX_A: u32 = (1 << Self::SIZE_A) - 1;
    pub const MAX_B: u32 = (1 << Self::SIZE_B) - 1;
    pub const MAX_C: u32 = (1 << Self::SIZE_C) - 1;
    pub const MAX_BX: u32 = (1 << Self::SIZE_BX) - 1;
    pub const MAX_SBX: i32 = (Self::MAX_BX >> 1) as i32; // 131071

    /// Marks an RK operand as a constant index.
    pub const BITRK: u32 = 1 << (Self::SIZE_B - 1);
    pub const MAXINDEXRK: u32 = Self::BITRK - 1;

    #[inline(always)]
    const fn mask1(n: u32, p: u32) -> u32 {
        (!((!0u32) << n)) << p
    }

    #[inline(always)]
    fn get_arg(self, pos: u32, size: u32) -> u32 {
        (self.0 >> pos) & Self::mask1(size, 0)
    }

    #[inline(always)]
    fn set_arg(&mut self, v: u32, pos: u32, size: u32) {
        self.0 = (self.0 & !Self::mask1(size, pos)) | ((v << pos) & Self::mask1(size, pos));
    }

    /// Raw opcode bits.
    #[inline(always)]
    pub fn opcode_byte(self) -> u8 {
        self.get_arg(Self::POS_OP, Self::SIZE_OP) as u8
    }

    #[inline(always)]
    pub fn get_opcode(self) -> Option<OpCode> {
        OpCode::from_u8(self.opcode_byte())
    }

    #[inline(always)]
    pub fn set_opcode(&mut self, op: OpCode) {
        self.set_arg(op as u32, Self::POS_OP, Self::SIZE_OP);
    }

    #[inline(always)]
    pub fn get_a(self) -> u32 {
        self.get_arg(Self::POS_A, Self::SIZE_A)
    }

    #[inline(always)]
    pub fn set_a(&mut self, v: u32) {
        self.set_arg(v, Self::POS_A, Self::SIZE_A)
    }

    #[inline(always)]
    pub fn get_b(self) -> u32 {
        self.get_arg(Self::POS_B, Self::SIZE_B)
    }

    #[inline(always)]
    pub fn set_b(&mut self, v: u32) {
        self.set_arg(v, Self::POS_B, Self::SIZE_B)
    }

    #[inline(always)]
    pub fn get_c(self) -> u32 {
        self.get_arg(Self::POS_C, Self::SIZE_C)
    }

    #[inline(always)]
    pub fn set_c(&mut self, v: u32) {
        self.set_arg(v, Self::POS_C, Self::SIZE_C)
    }

    #[inline(always)]
    pub fn get_bx(self) -> u32 {
        self.get_arg(Self::POS_BX, Self::SIZE_BX)
    }

    #[inline(always)]
    pub fn set_bx(&mut self, v: u32) {
        self.set_arg(v, Self::POS_BX, Self::SIZE_BX)
    }

    #[inline(always)]
    pub fn get_sbx(self) -> i32 {
        self.get_bx() as i32 - Self::MAX_SBX
    }

    #[inline(always)]
    pub fn set_sbx(&mut self, v: i32) {
        self.set_bx((v + Self::MAX_SBX) as u32)
    }

    #[inline(always)]
    pub fn is_k(rk: u32) -> bool {
        rk & Self::BITRK != 0
    }

    #[inline(always)]
    pub fn index_k(rk: u32) -> usize {
        (rk & !Self::BITRK) as usize
    }

    /// RK operand naming constant `k`.
    #[inline(always)]
    pub const fn rk_const(k: u32) -> u32 {
        k | Self::BITRK
    }

    pub fn create_abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        let mut i = Instruction(0);
        i.set_opcode(op);
        i.set_a(a);
        i.set_b(b);
        i.set_c(c);
        i
    }

    pub fn create_abx(op: OpCode, a: u32, bx: u32) -> Self {
        let mut i = Instruction(0);
        i.set_opcode(op);
        i.set_a(a);
        i.set_bx(bx);
        i
    }

    pub fn create_asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        let mut i = Instruction(0);
        i.set_opcode(op);
        i.set_a(a);
        i.set_sbx(sbx);
        i
    }
}

/// Decode the "floating point byte" table sizes used by NEWTABLE
/// (eeeeexxx: `(1xxx) * 2^(eeeee - 1)` when eeeee > 0).
pub fn fb2int(x: u32) -> usize {
    let e = (x >> 3) & 0x1f;
    if e == 0 {
        x as usize
    } else {
        ((x & 7) as usize + 8) << (e - 1)
    }
}

/// Inverse of `fb2int`, rounding up.
pub fn int2fb(mut x: u32) -> u32 {
    let mut e = 0;
    while x >= 16 {
        x = (x + 1) >> 1;
        e += 1;
    }
    if x < 8 { x } else { ((e + 1) << 3) | (x - 8) }
}
