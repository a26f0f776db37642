//! Joins the per-function machine code into one executable image.
//!
//! Function streams only refer to each other through symbolic call sites
//! and string handles, so linking is: order the functions, lay them out
//! behind the entry stub, merge the string pools into one read-only data
//! segment, and patch every site.

use asm::{Assembler, MachineCode, Register};
use std::collections::HashMap;

/// Base virtual address of the image. Code starts one page in.
pub const IMAGE_BASE: u64 = 0x40_0000;

const PAGE: u64 = 0x1000;

/// The syscall number of exit on x86-64 Linux.
const SYS_EXIT: i64 = 60;

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        NoMainFunction {
            display("No 'main' function defined")
        }
        UndefinedFunction(name: String) {
            display("Call to undefined function '{}'", name)
        }
        Assemble(err: asm::Error) {
            from()
            display("{}", err)
        }
    }
}

/// A linked, position-fixed image ready to be wrapped in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub code: Vec<u8>,
    pub rodata: Vec<u8>,
    pub code_address: u64,
    pub rodata_address: u64,
    pub entry: u64,
}

/// The entry stub calls `main` and exits with its return value.
fn entry_stub() -> Result<MachineCode, Error> {
    let mut stub = Assembler::new("_start");
    stub.call("main");
    stub.move_register_register(Register::Rdi, Register::Rax);
    stub.move_register_number(Register::Rax, SYS_EXIT);
    stub.syscall();
    Ok(stub.finalize()?)
}

/// Orders functions in call-graph order: main first, then its callees
/// depth-first. Functions unreachable from main keep their scan order at
/// the end.
fn call_graph_order(units: &[MachineCode]) -> Result<Vec<usize>, Error> {
    let index_by_name: HashMap<&str, usize> = units
        .iter()
        .enumerate()
        .map(|(i, unit)| (unit.name.as_str(), i))
        .collect();

    let Some(&main) = index_by_name.get("main") else {
        return Err(Error::NoMainFunction);
    };

    let mut order = Vec::with_capacity(units.len());
    let mut visited = vec![false; units.len()];
    let mut stack = vec![main];

    while let Some(index) = stack.pop() {
        if visited[index] {
            continue;
        }

        visited[index] = true;
        order.push(index);

        // Reversed so the first callee in the stream is visited first.
        for site in units[index].call_sites.iter().rev() {
            let Some(&callee) = index_by_name.get(site.name.as_str()) else {
                return Err(Error::UndefinedFunction(site.name.clone()));
            };

            if !visited[callee] {
                stack.push(callee);
            }
        }
    }

    for (index, seen) in visited.iter().enumerate() {
        if !seen {
            order.push(index);
        }
    }

    Ok(order)
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Links the compiled functions into an executable image.
pub fn link(units: Vec<MachineCode>) -> Result<Executable, Error> {
    let order = call_graph_order(&units)?;

    let stub = entry_stub()?;
    let mut parts: Vec<&MachineCode> = Vec::with_capacity(units.len() + 1);
    parts.push(&stub);
    parts.extend(order.iter().map(|&i| &units[i]));

    // Lay out the code and remember where every function starts.
    let mut offsets = HashMap::new();
    let mut code_size = 0usize;

    for part in &parts {
        offsets.insert(part.name.as_str(), code_size);
        code_size += part.code.len();
    }

    // Merge the per-function string pools, deduplicating across functions.
    let mut rodata = Vec::new();
    let mut string_offsets: HashMap<Vec<u8>, usize> = HashMap::new();

    for part in &parts {
        for (_, bytes) in part.strings.iter() {
            if !string_offsets.contains_key(bytes) {
                string_offsets.insert(bytes.to_vec(), rodata.len());
                rodata.extend_from_slice(bytes);
            }
        }
    }

    let code_address = IMAGE_BASE + PAGE;
    let rodata_address = align_up(code_address + code_size as u64, PAGE);

    // Concatenate and patch.
    let mut code = Vec::with_capacity(code_size);

    for part in &parts {
        let base = code.len();
        code.extend_from_slice(&part.code);

        for site in &part.call_sites {
            let target = offsets[site.name.as_str()];
            let site_offset = base + site.offset;
            let relative = target as i64 - (site_offset as i64 + 4);
            code[site_offset..site_offset + 4].copy_from_slice(&(relative as i32).to_le_bytes());
        }

        for site in &part.string_sites {
            let bytes = part.strings.get(site.id);
            let address = rodata_address + string_offsets[bytes] as u64;
            let site_offset = base + site.offset;
            code[site_offset..site_offset + 4].copy_from_slice(&(address as u32).to_le_bytes());
        }
    }

    Ok(Executable {
        code,
        rodata,
        code_address,
        rodata_address,
        entry: code_address,
    })
}
