mod instruction;

pub use instruction::{Instruction, fb2int, int2fb};

/// Instruction format modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
}

/// Lua 5.1 opcode set (38 opcodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,  // R(A) := R(B)
    LoadK,     // R(A) := Kst(Bx)
    LoadBool,  // R(A) := (Bool)B; if (C) pc++
    LoadNil,   // R(A) := ... := R(B) := nil
    GetUpval,  // R(A) := UpValue[B]
    GetGlobal, // R(A) := Gbl[Kst(Bx)]
    GetTable,  // R(A) := R(B)[RK(C)]
    SetGlobal, // Gbl[Kst(Bx)] := R(A)
    SetUpval,  // UpValue[B] := R(A)
    SetTable,  // R(A)[RK(B)] := RK(C)
    NewTable,  // R(A) := {} (size = B,C)
    Self_,     // R(A+1) := R(B); R(A) := R(B)[RK(C)]
    Add,       // R(A) := RK(B) + RK(C)
    Sub,       // R(A) := RK(B) - RK(C)
    Mul,       // R(A) := RK(B) * RK(C)
    Div,       // R(A) := RK(B) / RK(C)
    Mod,       // R(A) := RK(B) % RK(C)
    Pow,       // R(A) := RK(B) ^ RK(C)
    Unm,       // R(A) := -R(B)
    Not,       // R(A) := not R(B)
    Len,       // R(A) := length of R(B)
    Concat,    // R(A) := R(B).. ... ..R(C)
    Jmp,       // pc += sBx
    Eq,        // if ((RK(B) == RK(C)) ~= A) then pc++
    Lt,        // if ((RK(B) <  RK(C)) ~= A) then pc++
    Le,        // if ((RK(B) <= RK(C)) ~= A) then pc++
    Test,      // if not (R(A) <=> C) then pc++
    TestSet,   // if (R(B) <=> C) then R(A) := R(B) else pc++
    Call,      // R(A), ... ,R(A+C-2) := R(A)(R(A+1), ... ,R(A+B-1))
    TailCall,  // return R(A)(R(A+1), ... ,R(A+B-1))
    Return,    // return R(A), ... ,R(A+B-2)
    ForLoop,   // R(A)+=R(A+2); if R(A) <?= R(A+1) then { pc+=sBx; R(A+3)=R(A) }
    ForPrep,   // R(A)-=R(A+2); pc+=sBx
    TForLoop,  // R(A+3), ... ,R(A+2+C) := R(A)(R(A+1), R(A+2)); if R(A+3) ~= nil then R(A+2)=R(A+3) else pc++
    SetList,   // R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B
    Close,     // close all variables in the stack up to (>=) R(A)
    Closure,   // R(A) := closure(KPROTO[Bx], R(A), ... ,R(A+n))
    VarArg,    // R(A), R(A+1), ..., R(A+B-1) = vararg
}

impl OpCode {
    pub const COUNT: u8 = 38;

    /// Decode an opcode byte, `None` for values outside the instruction set.
    #[inline(always)]
    pub fn from_u8(byte: u8) -> Option<Self> {
        use OpCode::*;
        const TABLE: [OpCode; OpCode::COUNT as usize] = [
            Move, LoadK, LoadBool, LoadNil, GetUpval, GetGlobal, GetTable, SetGlobal, SetUpval,
            SetTable, NewTable, Self_, Add, Sub, Mul, Div, Mod, Pow, Unm, Not, Len, Concat, Jmp,
            Eq, Lt, Le, Test, TestSet, Call, TailCall, Return, ForLoop, ForPrep, TForLoop,
            SetList, Close, Closure, VarArg,
        ];
        TABLE.get(byte as usize).copied()
    }

    pub fn get_mode(self) -> OpMode {
        use OpCode::*;
        match self {
            LoadK | GetGlobal | SetGlobal | Closure => OpMode::IABx,
            Jmp | ForLoop | ForPrep => OpMode::IAsBx,
            _ => OpMode::IABC,
        }
    }

    /// Opcode name as printed by listings (`MOVE`, `GETGLOBAL`, ...).
    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetGlobal => "GETGLOBAL",
            GetTable => "GETTABLE",
            SetGlobal => "SETGLOBAL",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Pow => "POW",
            Unm => "UNM",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Close => "CLOSE",
            Closure => "CLOSURE",
            VarArg => "VARARG",
        }
    }
}
