//! Integration tests for the loadcode crate
//!
//! Tests the full pipeline: load → call → unload, through the owned handle,
//! the shared table, and the C ABI.

use std::ptr;

use loadcode::{
    loadcode_load, loadcode_unload, ErrorCode, Function, FunctionTable, LoadError, State,
};

/// Hand-assembled routines for the host architecture
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
mod code {
    /// Returns `value`, ignoring its arguments
    #[cfg(target_arch = "x86_64")]
    pub fn return_constant(value: i32) -> Vec<u8> {
        // mov eax, imm32; ret
        let mut code = vec![0xb8];
        code.extend_from_slice(&value.to_le_bytes());
        code.push(0xc3);
        code
    }

    /// Returns `value`, ignoring its arguments
    #[cfg(target_arch = "aarch64")]
    pub fn return_constant(value: i32) -> Vec<u8> {
        let bits = value as u32;
        // movz w0, #lo; movk w0, #hi, lsl #16; ret
        let movz = 0x5280_0000u32 | ((bits & 0xffff) << 5);
        let movk = 0x72a0_0000u32 | ((bits >> 16) << 5);
        [movz, movk, 0xd65f_03c0]
            .iter()
            .flat_map(|i| i.to_le_bytes())
            .collect()
    }

    /// Returns the first byte of `data`
    #[cfg(all(target_arch = "x86_64", not(windows)))]
    pub fn first_byte() -> Vec<u8> {
        // movzx eax, byte ptr [rdi]; ret
        vec![0x0f, 0xb6, 0x07, 0xc3]
    }

    /// Returns the first byte of `data`
    #[cfg(all(target_arch = "x86_64", windows))]
    pub fn first_byte() -> Vec<u8> {
        // movzx eax, byte ptr [rcx]; ret
        vec![0x0f, 0xb6, 0x01, 0xc3]
    }

    /// Returns the first byte of `data`
    #[cfg(target_arch = "aarch64")]
    pub fn first_byte() -> Vec<u8> {
        // ldrb w0, [x0]; ret
        [0x3940_0000u32, 0xd65f_03c0]
            .iter()
            .flat_map(|i| i.to_le_bytes())
            .collect()
    }

    /// `return_constant(value)` followed by padding up to `len` bytes
    pub fn padded(value: i32, len: usize) -> Vec<u8> {
        let mut code = return_constant(value);
        code.resize(len.max(code.len()), 0);
        code
    }
}

#[test]
fn test_empty_code_is_rejected() {
    let result = Function::load(&[]);
    assert!(matches!(
        result,
        Err(LoadError::SizeMismatch {
            expected: 1,
            actual: 0
        })
    ));
}

#[test]
fn test_load_unload_cycles() {
    for size in [1usize, 16, 4096, 65536] {
        let code = vec![0xc3u8; size];
        for _ in 0..200 {
            let function = Function::load(&code).expect("load should succeed");
            assert_eq!(function.len(), size);
            assert_eq!(function.state(), State::Executable);
            function.unload().expect("unload should succeed");
        }
    }
}

#[test]
fn test_table_double_unload() {
    let table = FunctionTable::new();
    let id = table.load(&[0xc3; 16]).expect("load should succeed");
    assert_eq!(table.len(), 1);

    table.unload(id).expect("first unload should succeed");
    let second = table.unload(id);
    assert!(matches!(second, Err(LoadError::InvalidHandle { .. })));
    assert_eq!(second.unwrap_err().code(), ErrorCode::InvalidHandle);
    assert!(table.is_empty());
}

#[test]
fn test_table_call_after_unload() {
    let table = FunctionTable::new();
    let id = table.load(&[0xc3; 16]).expect("load should succeed");
    table.unload(id).expect("unload should succeed");

    let result = unsafe { table.call(id, b"elo") };
    assert!(matches!(result, Err(LoadError::InvalidHandle { .. })));
}

#[test]
fn test_c_abi_rejects_bad_arguments() {
    let mut handle = ptr::null_mut();
    let rc = unsafe { loadcode_load([0xc3u8].as_ptr(), 0, &mut handle) };
    assert_eq!(rc, ErrorCode::SizeMismatch as i32);
    assert!(handle.is_null());

    let rc = unsafe { loadcode_unload(ptr::null_mut()) };
    assert_eq!(rc, ErrorCode::InvalidHandle as i32);
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
mod executing {
    use std::{ptr, sync::Arc, thread};

    use loadcode::{loadcode_call, loadcode_load, loadcode_unload, Function, FunctionTable};
    use proptest::prelude::*;

    use super::code;

    #[test]
    fn test_round_trip_constants() {
        for value in [0, 1, -1, 42] {
            let function =
                Function::load(&code::return_constant(value)).expect("load should succeed");
            let inputs: [&[u8]; 3] = [b"", b"elo", &[0xff; 64]];
            for input in inputs {
                assert_eq!(unsafe { function.call(input) }, value);
            }
            function.unload().expect("unload should succeed");
        }
    }

    #[test]
    fn test_padded_code_sizes() {
        for size in [16usize, 4096, 65536] {
            let function = Function::load(&code::padded(-7, size)).expect("load should succeed");
            assert_eq!(function.len(), size);
            assert_eq!(unsafe { function.call(b"") }, -7);
            function.unload().expect("unload should succeed");
        }
    }

    #[test]
    fn test_call_reads_data() {
        let function = Function::load(&code::first_byte()).expect("load should succeed");
        unsafe {
            assert_eq!(function.call(b"a"), i32::from(b'a'));
            assert_eq!(function.call(&[0xff, 0x00]), 0xff);
        }
    }

    #[test]
    fn test_cross_handle_independence() {
        let threads: Vec<_> = (0..8)
            .map(|i| {
                thread::spawn(move || {
                    let constant = Function::load(&code::return_constant(i * 1000))
                        .expect("load should succeed");
                    let reader = Function::load(&code::first_byte()).expect("load should succeed");
                    for round in 0..100u8 {
                        let input = [round.wrapping_add(i as u8)];
                        unsafe {
                            assert_eq!(constant.call(&input), i * 1000);
                            assert_eq!(reader.call(&input), i32::from(input[0]));
                        }
                    }
                    constant.unload().expect("unload should succeed");
                    reader.unload().expect("unload should succeed");
                })
            })
            .collect();

        for t in threads {
            t.join().expect("thread should not panic");
        }
    }

    #[test]
    fn test_shared_function_across_threads() {
        let function = Arc::new(Function::load(&code::first_byte()).expect("load should succeed"));

        let threads: Vec<_> = (0..4u8)
            .map(|i| {
                let function = Arc::clone(&function);
                thread::spawn(move || unsafe { function.call(&[i]) })
            })
            .collect();

        let results: Vec<i32> = threads
            .into_iter()
            .map(|t| t.join().expect("thread should not panic"))
            .collect();
        assert_eq!(results, vec![0, 1, 2, 3]);

        let function = Arc::try_unwrap(function).expect("all clones dropped");
        function.unload().expect("unload should succeed");
    }

    #[test]
    fn test_table_concurrent_load_call_unload() {
        let table = Arc::new(FunctionTable::new());

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let id = table
                            .load(&code::return_constant(i))
                            .expect("load should succeed");
                        assert_eq!(unsafe { table.call(id, b"elo") }, Ok(i));
                        table.unload(id).expect("unload should succeed");
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().expect("thread should not panic");
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_c_abi_round_trip() {
        let code = code::return_constant(7);
        let mut handle = ptr::null_mut();
        unsafe {
            assert_eq!(loadcode_load(code.as_ptr(), code.len(), &mut handle), 0);
            let data = b"elo";
            assert_eq!(loadcode_call(handle, data.as_ptr(), data.len()), 7);
            assert_eq!(loadcode_unload(handle), 0);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_returns_loaded_constant(
            value in any::<i32>(),
            data in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let function =
                Function::load(&code::return_constant(value)).expect("load should succeed");
            prop_assert_eq!(unsafe { function.call(&data) }, value);
            function.unload().expect("unload should succeed");
        }
    }
}
