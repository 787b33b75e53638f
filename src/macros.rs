/// Builds an `InsnList` from a compact bracketed syntax, mostly used to write
/// probe code.
///
/// # Syntax
/// Each instruction sits in its own brackets: `[prefix OPCODE operands]`.
///
/// * **Simple:** `[RETURN]`, `[DUP]`
/// * **Int:** `[int BIPUSH 10]`
/// * **Var:** `[var ALOAD 0]`
/// * **Type:** `[type NEW "java/lang/StringBuilder"]`
/// * **Field:** `[field GETSTATIC "owner", "name", "descriptor"]`
/// * **Method:** `[method INVOKEVIRTUAL "owner", "name", "descriptor"]`
/// * **Ldc:** `[ldc "text"]`, or `[ldc_int 70000]` for an int constant
/// * **Label:** `[label 1]` places label `1`
/// * **Jump:** `[jump IFEQ 1]` branches to label `1`
/// * **Iinc:** `[iinc 2, 1]`
///
/// Label ids are local to the list. When the list is injected as probe code
/// every label is replaced by a fresh one of the target method.
///
/// ## Example
///
/// ```rust
/// use probe_asm::{insn_list, opcodes, insn::Insn};
///
/// let list = insn_list! {
///     [field GETSTATIC "java/lang/System", "out", "Ljava/io/PrintStream;"]
///     [ldc "entered"]
///     [method INVOKEVIRTUAL "java/io/PrintStream", "println", "(Ljava/lang/String;)V"]
/// };
///
/// let insns: Vec<&Insn> = list.insns().collect();
/// assert_eq!(insns.len(), 3);
/// assert_eq!(insns[2].opcode(), opcodes::INVOKEVIRTUAL);
/// ```
#[macro_export]
macro_rules! insn_list {
    ( $( [ $($instruction:tt)+ ] )* ) => {
        {
            let mut list = $crate::insn::InsnList::new();
            $(
                $crate::insn_list!(@dispatch list, $($instruction)+);
            )*
            list
        }
    };

    (@dispatch $list:ident, $opcode:ident) => {
        $list.add($crate::insn::InsnNode { opcode: $crate::opcodes::$opcode });
    };

    (@dispatch $list:ident, int $opcode:ident $operand:expr) => {
        $list.add($crate::insn::IntInsnNode {
            insn: $crate::insn::InsnNode { opcode: $crate::opcodes::$opcode },
            operand: $operand as i32,
        });
    };

    (@dispatch $list:ident, var $opcode:ident $index:expr) => {
        $list.add($crate::insn::VarInsnNode {
            insn: $crate::insn::InsnNode { opcode: $crate::opcodes::$opcode },
            var_index: $index as u16,
        });
    };

    (@dispatch $list:ident, type $opcode:ident $name:expr) => {
        $list.add($crate::insn::TypeInsnNode {
            insn: $crate::insn::InsnNode { opcode: $crate::opcodes::$opcode },
            type_name: ::std::string::String::from($name),
        });
    };

    (@dispatch $list:ident, field $opcode:ident $owner:expr, $name:expr, $desc:expr) => {
        $list.add($crate::insn::FieldInsnNode::new(
            $crate::opcodes::$opcode,
            $owner,
            $name,
            $desc
        ));
    };

    (@dispatch $list:ident, method $opcode:ident $owner:expr, $name:expr, $desc:expr) => {
        $list.add($crate::insn::MethodInsnNode::new(
            $crate::opcodes::$opcode,
            $owner,
            $name,
            $desc
        ));
    };

    (@dispatch $list:ident, ldc $value:expr) => {
        $list.add($crate::insn::LdcInsnNode::string($value));
    };

    (@dispatch $list:ident, ldc_int $value:expr) => {
        $list.add($crate::insn::LdcInsnNode::new(
            $crate::insn::LdcConstant::Integer($value as i32)
        ));
    };

    (@dispatch $list:ident, label $id:expr) => {
        $list.add($crate::insn::LabelNode { id: $id as usize });
    };

    (@dispatch $list:ident, jump $opcode:ident $id:expr) => {
        $list.add($crate::insn::JumpInsnNode {
            insn: $crate::insn::InsnNode { opcode: $crate::opcodes::$opcode },
            target: $crate::insn::LabelNode { id: $id as usize },
        });
    };

    (@dispatch $list:ident, iinc $var:expr, $incr:expr) => {
        $list.add($crate::insn::IincInsnNode {
            insn: $crate::insn::InsnNode { opcode: $crate::opcodes::IINC },
            var_index: $var as u16,
            increment: $incr as i16,
        });
    };
}

/// Implements every instruction callback of `MethodVisitor` by building the
/// matching [`Insn`](crate::insn::Insn) and handing it to `self.$handler`.
macro_rules! visit_insns_via {
    ($handler:ident) => {
        fn visit_insn(&mut self, opcode: u8) {
            self.$handler($crate::insn::InsnNode { opcode }.into());
        }

        fn visit_int_insn(&mut self, opcode: u8, operand: i32) {
            self.$handler(
                $crate::insn::IntInsnNode {
                    insn: opcode.into(),
                    operand,
                }
                .into(),
            );
        }

        fn visit_var_insn(&mut self, opcode: u8, var_index: u16) {
            self.$handler(
                $crate::insn::VarInsnNode {
                    insn: opcode.into(),
                    var_index,
                }
                .into(),
            );
        }

        fn visit_type_insn(&mut self, opcode: u8, type_name: &str) {
            self.$handler(
                $crate::insn::TypeInsnNode {
                    insn: opcode.into(),
                    type_name: type_name.to_string(),
                }
                .into(),
            );
        }

        fn visit_field_insn(&mut self, opcode: u8, owner: &str, name: &str, desc: &str) {
            self.$handler($crate::insn::FieldInsnNode::new(opcode, owner, name, desc).into());
        }

        fn visit_method_insn(
            &mut self,
            opcode: u8,
            owner: &str,
            name: &str,
            desc: &str,
            is_interface: bool,
        ) {
            let mut node = $crate::insn::MethodInsnNode::new(opcode, owner, name, desc);
            node.is_interface = is_interface;
            self.$handler(node.into());
        }

        fn visit_invoke_dynamic_insn(&mut self, bootstrap_index: u16, name: &str, desc: &str) {
            self.$handler(
                $crate::insn::InvokeDynamicInsnNode {
                    insn: $crate::opcodes::INVOKEDYNAMIC.into(),
                    bootstrap_index,
                    name: name.to_string(),
                    descriptor: desc.to_string(),
                }
                .into(),
            );
        }

        fn visit_jump_insn(&mut self, opcode: u8, target: $crate::insn::LabelNode) {
            self.$handler(
                $crate::insn::JumpInsnNode {
                    insn: opcode.into(),
                    target,
                }
                .into(),
            );
        }

        fn visit_ldc_insn(&mut self, value: $crate::insn::LdcConstant) {
            self.$handler($crate::insn::LdcInsnNode::new(value).into());
        }

        fn visit_iinc_insn(&mut self, var_index: u16, increment: i16) {
            self.$handler(
                $crate::insn::IincInsnNode {
                    insn: $crate::opcodes::IINC.into(),
                    var_index,
                    increment,
                }
                .into(),
            );
        }

        fn visit_table_switch(
            &mut self,
            low: i32,
            high: i32,
            default: $crate::insn::LabelNode,
            targets: &[$crate::insn::LabelNode],
        ) {
            self.$handler(
                $crate::insn::TableSwitchInsnNode {
                    insn: $crate::opcodes::TABLESWITCH.into(),
                    default,
                    low,
                    high,
                    targets: targets.to_vec(),
                }
                .into(),
            );
        }

        fn visit_lookup_switch(
            &mut self,
            default: $crate::insn::LabelNode,
            pairs: &[(i32, $crate::insn::LabelNode)],
        ) {
            self.$handler(
                $crate::insn::LookupSwitchInsnNode {
                    insn: $crate::opcodes::LOOKUPSWITCH.into(),
                    default,
                    pairs: pairs.to_vec(),
                }
                .into(),
            );
        }

        fn visit_multi_anewarray_insn(&mut self, type_name: &str, dims: u8) {
            self.$handler(
                $crate::insn::MultiANewArrayInsnNode {
                    insn: $crate::opcodes::MULTIANEWARRAY.into(),
                    type_name: type_name.to_string(),
                    dimensions: dims,
                }
                .into(),
            );
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::insn::{AbstractInsnNode, Insn, LabelNode, LdcConstant};
    use crate::opcodes;

    #[test]
    fn test_insn_list_macro_expansion() {
        let list = insn_list! {
            [NOP]
            [int BIPUSH 42]
            [var ALOAD 1]
            [type NEW "java/lang/Object"]
            [field GETSTATIC "java/lang/System", "out", "Ljava/io/PrintStream;"]
            [ldc "Hello Macro"]
            [label 3]
            [jump GOTO 3]
            [iinc 2, 1]
            [RETURN]
        };

        assert_eq!(list.len(), 10);
        assert_eq!(list.nodes()[6], AbstractInsnNode::Label(LabelNode { id: 3 }));

        let insns: Vec<&Insn> = list.insns().collect();
        assert_eq!(insns.len(), 9);

        if let Insn::Int(node) = insns[1] {
            assert_eq!(node.insn.opcode, opcodes::BIPUSH);
            assert_eq!(node.operand, 42);
        } else {
            panic!("Expected Int Insn at index 1");
        }

        if let Insn::Type(node) = insns[3] {
            assert_eq!(node.insn.opcode, opcodes::NEW);
            assert_eq!(node.type_name, "java/lang/Object");
        } else {
            panic!("Expected Type Insn at index 3");
        }

        if let Insn::Field(node) = insns[4] {
            assert_eq!(node.owner, "java/lang/System");
            assert_eq!(node.name, "out");
            assert_eq!(node.descriptor, "Ljava/io/PrintStream;");
        } else {
            panic!("Expected Field Insn at index 4");
        }

        if let Insn::Ldc(node) = insns[5] {
            assert_eq!(node.value, LdcConstant::String("Hello Macro".to_string()));
        } else {
            panic!("Expected Ldc Insn at index 5");
        }

        assert_eq!(insns[6].targets(), vec![LabelNode { id: 3 }]);

        if let Insn::Iinc(node) = insns[7] {
            assert_eq!(node.var_index, 2);
            assert_eq!(node.increment, 1);
        } else {
            panic!("Expected Iinc Insn at index 7");
        }
    }
}
