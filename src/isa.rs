// RV64IMA + Zicsr opcode and funct constants.
// Keep this file close to the reference card for readability.

// Opcodes (instr[6:0])
pub const OPCODE_LOAD: u32      = 0b0000011; // I-type: loads
pub const OPCODE_MISC_MEM: u32  = 0b0001111; // fence
pub const OPCODE_OP_IMM: u32    = 0b0010011; // I-type: ALU immediate
pub const OPCODE_AUIPC: u32     = 0b0010111; // U-type: AUIPC
pub const OPCODE_OP_IMM_32: u32 = 0b0011011; // I-type: ALU immediate word (RV64)
pub const OPCODE_STORE: u32     = 0b0100011; // S-type: stores
pub const OPCODE_AMO: u32       = 0b0101111; // R-type: atomics (A extension)
pub const OPCODE_OP: u32        = 0b0110011; // R-type: ALU register
pub const OPCODE_LUI: u32       = 0b0110111; // U-type: LUI
pub const OPCODE_OP_32: u32     = 0b0111011; // R-type: ALU register word (RV64)
pub const OPCODE_BRANCH: u32    = 0b1100011; // B-type: branches
pub const OPCODE_JALR: u32      = 0b1100111; // I-type: JALR
pub const OPCODE_JAL: u32       = 0b1101111; // J-type: JAL
pub const OPCODE_SYSTEM: u32    = 0b1110011; // ecall/ebreak/xret/CSR

// ALU funct3
pub const F3_ADD_SUB: u32 = 0b000;
pub const F3_SLL: u32     = 0b001;
pub const F3_SLT: u32     = 0b010;
pub const F3_SLTU: u32    = 0b011;
pub const F3_XOR: u32     = 0b100;
pub const F3_SRL_SRA: u32 = 0b101;
pub const F3_OR: u32      = 0b110;
pub const F3_AND: u32     = 0b111;

// branch funct3
pub const F3_BEQ: u32  = 0b000;
pub const F3_BNE: u32  = 0b001;
pub const F3_BLT: u32  = 0b100;
pub const F3_BGE: u32  = 0b101;
pub const F3_BLTU: u32 = 0b110;
pub const F3_BGEU: u32 = 0b111;

// load/store funct3
pub const F3_LB: u32  = 0b000;
pub const F3_LH: u32  = 0b001;
pub const F3_LW: u32  = 0b010;
pub const F3_LD: u32  = 0b011;
pub const F3_LBU: u32 = 0b100;
pub const F3_LHU: u32 = 0b101;
pub const F3_LWU: u32 = 0b110;

pub const F3_SB: u32 = 0b000;
pub const F3_SH: u32 = 0b001;
pub const F3_SW: u32 = 0b010;
pub const F3_SD: u32 = 0b011;

// system funct3
pub const F3_PRIV: u32   = 0b000;
pub const F3_CSRRW: u32  = 0b001;
pub const F3_CSRRS: u32  = 0b010;
pub const F3_CSRRC: u32  = 0b011;
pub const F3_CSRRWI: u32 = 0b101;
pub const F3_CSRRSI: u32 = 0b110;
pub const F3_CSRRCI: u32 = 0b111;

// M extension (funct7 = 1) funct3
pub const F3_MUL: u32    = 0b000;
pub const F3_MULH: u32   = 0b001;
pub const F3_MULHSU: u32 = 0b010;
pub const F3_MULHU: u32  = 0b011;
pub const F3_DIV: u32    = 0b100;
pub const F3_DIVU: u32   = 0b101;
pub const F3_REM: u32    = 0b110;
pub const F3_REMU: u32   = 0b111;

// funct7 values
pub const F7_BASE: u32    = 0b0000000;
pub const F7_MULDIV: u32  = 0b0000001;
pub const F7_SUB_SRA: u32 = 0b0100000;

// AMO funct3 (width) and funct5 (instr[31:27])
pub const F3_AMO_W: u32 = 0b010;
pub const F3_AMO_D: u32 = 0b011;

pub const F5_AMOADD: u32  = 0b00000;
pub const F5_AMOSWAP: u32 = 0b00001;
pub const F5_AMOXOR: u32  = 0b00100;
pub const F5_AMOOR: u32   = 0b01000;
pub const F5_AMOAND: u32  = 0b01100;
pub const F5_AMOMIN: u32  = 0b10000;
pub const F5_AMOMAX: u32  = 0b10100;
pub const F5_AMOMINU: u32 = 0b11000;
pub const F5_AMOMAXU: u32 = 0b11100;

// SYSTEM with funct3=0, discriminated by rs2/funct7
pub const RS2_ECALL: u32  = 0b00000;
pub const RS2_EBREAK: u32 = 0b00001;
pub const RS2_RET: u32    = 0b00010;
pub const F7_SRET: u32        = 0b0001000;
pub const F7_MRET: u32        = 0b0011000;
pub const F7_SFENCE_VMA: u32  = 0b0001001;
