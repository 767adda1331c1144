//! Virtual tables: per-class dispatch plus the data for fast subtype
//! tests.
//!
//! Each VT carries the primary display (the super chain indexed by depth),
//! a sorted, deduplicated list of secondary types (interfaces and supers
//! beyond the display), a one-entry cache of the last successful secondary
//! test, the interface method table and the virtual method slots.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::class::{ClassRef, CommonClass, MethodPtr};
use crate::errors::JavaError;
use crate::loader::ClassLoader;
use crate::names::Name;

/// Length of the primary display.
pub const DISPLAY_LENGTH: usize = 8;
/// Word offset of the type cache in the original layout; doubles as the
/// "secondary" marker in the offset field.
pub const CACHE_INDEX: usize = 6;
/// Word index of the first Java method slot.
pub const FIRST_METHOD_INDEX: usize = 18;
/// Number of java/lang/Object method slots:
/// init/equals/hashCode/toString/clone/getClass/notify/notifyAll/wait x3.
pub const NUM_JAVA_METHODS: usize = 11;
/// Size of the java/lang/Object virtual table.
pub const BASE_SIZE: usize = FIRST_METHOD_INDEX + NUM_JAVA_METHODS;

/// Buckets in an interface method table.
pub const IMT_SIZE: usize = 29;

/// A raw pointer to a virtual table. VTs are owned by their class and live
/// as long as the loader, so the pointer is stable; ordering compares
/// addresses, which is what keeps secondary-type lists sorted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct VtPtr(*const VirtualTable);

unsafe impl Send for VtPtr {}
unsafe impl Sync for VtPtr {}

impl VtPtr {
    pub fn of(vt: &VirtualTable) -> VtPtr {
        VtPtr(vt as *const VirtualTable)
    }

    pub fn null() -> VtPtr {
        VtPtr(std::ptr::null())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn get(&self) -> &'static VirtualTable {
        debug_assert!(!self.0.is_null());
        unsafe { &*self.0 }
    }

    pub fn addr(&self) -> usize {
        self.0 as usize
    }
}

pub enum ImtBucket {
    Empty,
    /// A single method hashed here: direct dispatch.
    Direct(MethodPtr),
    /// Hash collision: the conflict list is searched by name and
    /// descriptor.
    Conflicts(Vec<MethodPtr>),
}

/// Fixed-width interface method table, keyed by
/// `hash(name, descriptor) mod IMT_SIZE`.
pub struct Imt {
    pub buckets: [ImtBucket; IMT_SIZE],
}

pub fn imt_index(name: &Name, ty: &Name) -> usize {
    ((name.content_hash() ^ ty.content_hash()) as usize) % IMT_SIZE
}

impl Imt {
    /// Finds the implementation for an interface method.
    pub fn lookup(&self, name: &Name, ty: &Name) -> Option<MethodPtr> {
        match &self.buckets[imt_index(name, ty)] {
            ImtBucket::Empty => None,
            ImtBucket::Direct(method) => Some(*method),
            ImtBucket::Conflicts(methods) => methods
                .iter()
                .find(|m| {
                    let meth = m.get();
                    meth.name.same_chars(name.chars()) && meth.ty.same_chars(ty.chars())
                })
                .copied(),
        }
    }
}

pub struct VirtualTable {
    /// GC-plan callable tracer entry; 0 until the compiler installs one.
    pub tracer: AtomicUsize,
    /// Native destructor entry, used by the finalizer worker in place of a
    /// Java finalize method.
    pub operator_delete: AtomicUsize,
    /// The Java finalize override reachable from this class, if any.
    pub finalize_method: Option<MethodPtr>,
    class: *const CommonClass,
    /// Super-chain depth of the class.
    pub depth: usize,
    /// CACHE_INDEX when subtype tests must go through the secondary list,
    /// CACHE_INDEX + depth + 1 when the display answers them.
    pub offset: usize,
    /// Last successful secondary-type test target.
    cache: AtomicUsize,
    pub imt: Option<Box<Imt>>,
    pub display: [VtPtr; DISPLAY_LENGTH],
    /// Sorted by address, deduplicated.
    pub secondary_types: Vec<VtPtr>,
    /// Component VT for arrays, used by array store checks.
    pub base_class_vt: VtPtr,
    /// Virtual method slots, indexed by `offset - FIRST_METHOD_INDEX`.
    pub methods: Vec<Option<MethodPtr>>,
}

unsafe impl Send for VirtualTable {}
unsafe impl Sync for VirtualTable {}

impl VirtualTable {
    pub fn class(&self) -> &'static CommonClass {
        unsafe { &*self.class }
    }

    pub fn as_ptr(&self) -> VtPtr {
        VtPtr::of(self)
    }

    pub fn is_secondary(&self) -> bool {
        self.offset == CACHE_INDEX
    }

    pub fn nb_secondary_types(&self) -> usize {
        self.secondary_types.len()
    }

    /// The method installed at a VT offset assigned by `assign_offsets`.
    pub fn method_at(&self, offset: usize) -> Option<MethodPtr> {
        self.methods
            .get(offset.checked_sub(FIRST_METHOD_INDEX)?)
            .copied()
            .flatten()
    }

    /// The display + secondary-type subtype test.
    ///
    /// `self <: other` holds iff `self.display[other.depth] == other`, or
    /// `other` is a secondary type (interface or deep super) found in the
    /// sorted secondary list. A hit through the list is remembered in the
    /// cache slot so the next identical test skips the search. Arrays
    /// additionally fall back to their component VTs for covariance.
    pub fn is_subtype_of(&self, other: &VirtualTable) -> bool {
        let other_ptr = VtPtr::of(other);
        if other.offset != CACHE_INDEX {
            return other.depth < DISPLAY_LENGTH && self.display[other.depth] == other_ptr;
        }
        if std::ptr::eq(self, other) {
            return true;
        }
        if self.cache.load(Ordering::Relaxed) == other_ptr.addr() {
            return true;
        }
        if self.secondary_types.binary_search(&other_ptr).is_ok() {
            self.cache.store(other_ptr.addr(), Ordering::Relaxed);
            return true;
        }
        if self.class().is_array()
            && other.class().is_array()
            && !self.base_class_vt.is_null()
            && !other.base_class_vt.is_null()
        {
            return self.base_class_vt.get().is_subtype_of(other.base_class_vt.get());
        }
        false
    }

    pub fn cached_secondary(&self) -> usize {
        self.cache.load(Ordering::Relaxed)
    }
}

fn sort_and_dedup(secondary: &mut Vec<VtPtr>) {
    secondary.sort();
    secondary.dedup();
}

/// Assigns virtual-table offsets to the methods of a regular class:
/// overrides reuse the super's slot, finalize pins to 0, everything else
/// extends the table.
fn assign_offsets(class: &ClassRef) -> usize {
    let rc = class.as_regular().expect("vt offsets on a regular class");
    let mut vt_size = match &class.super_class {
        Some(superclass) => superclass
            .as_regular()
            .map(|s| s.virtual_table_size.load(Ordering::Acquire))
            .unwrap_or(FIRST_METHOD_INDEX),
        None => FIRST_METHOD_INDEX,
    };
    let finalize_name: Vec<u16> = "finalize".encode_utf16().collect();
    let void_desc: Vec<u16> = "()V".encode_utf16().collect();
    for method in &rc.virtual_methods {
        if method.name.same_chars(&finalize_name) && method.ty.same_chars(&void_desc) {
            method.offset.store(0, Ordering::Release);
            continue;
        }
        let parent = class.super_class.as_ref().and_then(|s| {
            s.lookup_method_dont_throw(&method.name, &method.ty, false, true)
        });
        match parent {
            Some((_, parent_method)) => {
                method
                    .offset
                    .store(parent_method.get().offset.load(Ordering::Acquire), Ordering::Release);
            }
            None => {
                method.offset.store(vt_size, Ordering::Release);
                vt_size += 1;
            }
        }
    }
    rc.virtual_table_size.store(vt_size, Ordering::Release);
    vt_size
}

/// Fills method slots by walking the chain from the root down, so
/// overriders replace their parents.
fn fill_method_slots(class: &ClassRef, vt_size: usize) -> (Vec<Option<MethodPtr>>, Option<MethodPtr>) {
    let mut chain = Vec::new();
    let mut cur = Some(class.clone());
    while let Some(c) = cur {
        cur = c.super_class.clone();
        chain.push(c);
    }
    chain.reverse();
    let mut slots = vec![None; vt_size.saturating_sub(FIRST_METHOD_INDEX)];
    let mut finalize_method = None;
    for link in &chain {
        let Some(rc) = link.as_regular() else { continue };
        for method in &rc.virtual_methods {
            let offset = method.offset.load(Ordering::Acquire);
            if offset >= FIRST_METHOD_INDEX {
                slots[offset - FIRST_METHOD_INDEX] = Some(MethodPtr::of(method));
            } else if offset == 0 && !method.is_abstract() {
                finalize_method = Some(MethodPtr::of(method));
            }
        }
    }
    (slots, finalize_method)
}

/// Collects every (interface) method an invokeinterface on this class
/// could name: interfaces transitively, the super chain, and
/// java/lang/Object's own methods.
fn collect_interface_methods(class: &ClassRef, out: &mut Vec<(Name, Name)>) {
    for interface in &class.interfaces {
        collect_interface_methods(interface, out);
    }
    if let Some(superclass) = &class.super_class {
        collect_interface_methods(superclass, out);
    }
    if class.is_interface() || class.super_class.is_none() {
        if let Some(rc) = class.as_regular() {
            for method in &rc.virtual_methods {
                let pair = (method.name.clone(), method.ty.clone());
                if !out
                    .iter()
                    .any(|(n, t)| n.same_chars(pair.0.chars()) && t.same_chars(pair.1.chars()))
                {
                    out.push(pair);
                }
            }
        }
    }
}

fn build_imt(class: &ClassRef) -> Box<Imt> {
    let mut pairs = Vec::new();
    collect_interface_methods(class, &mut pairs);
    let mut buckets: [Vec<MethodPtr>; IMT_SIZE] = std::array::from_fn(|_| Vec::new());
    for (name, ty) in pairs {
        if let Some((_, implementation)) =
            class.lookup_method_dont_throw(&name, &ty, false, true)
        {
            let bucket = &mut buckets[imt_index(&name, &ty)];
            if !bucket.contains(&implementation) {
                bucket.push(implementation);
            }
        }
    }
    let buckets = buckets.map(|methods| match methods.len() {
        0 => ImtBucket::Empty,
        1 => ImtBucket::Direct(methods[0]),
        _ => ImtBucket::Conflicts(methods),
    });
    Box::new(Imt { buckets })
}

fn blank_vt(class: &ClassRef) -> Box<VirtualTable> {
    Box::new(VirtualTable {
        tracer: AtomicUsize::new(0),
        operator_delete: AtomicUsize::new(0),
        finalize_method: None,
        class: Arc::as_ptr(class),
        depth: 0,
        offset: CACHE_INDEX + 1,
        cache: AtomicUsize::new(0),
        imt: None,
        display: [VtPtr::null(); DISPLAY_LENGTH],
        secondary_types: Vec::new(),
        base_class_vt: VtPtr::null(),
        methods: Vec::new(),
    })
}

/// Builds the VT of a freshly resolved regular class. The super and all
/// interfaces must already carry their VTs.
pub fn build_class_vt(class: &ClassRef) -> Result<Box<VirtualTable>, JavaError> {
    let vt_size = assign_offsets(class);
    let (methods, finalize_method) = fill_method_slots(class, vt_size);
    let mut vt = blank_vt(class);
    vt.methods = methods;
    vt.finalize_method = finalize_method;
    let self_ptr = VtPtr::of(&vt);

    match &class.super_class {
        None => {
            // java/lang/Object: depth 0, no secondary types.
            vt.depth = 0;
            vt.display[0] = self_ptr;
            vt.offset = CACHE_INDEX + 1;
        }
        Some(superclass) => {
            let super_vt = superclass.vt().expect("super resolved without VT");
            vt.depth = super_vt.depth + 1;
            let copy = vt.depth.min(DISPLAY_LENGTH);
            vt.display[..copy].copy_from_slice(&super_vt.display[..copy]);

            let mut out_of_depth = false;
            if class.is_interface() {
                vt.offset = CACHE_INDEX;
            } else if vt.depth < DISPLAY_LENGTH {
                vt.display[vt.depth] = self_ptr;
                vt.offset = CACHE_INDEX + vt.depth + 1;
            } else {
                vt.offset = CACHE_INDEX;
                out_of_depth = true;
            }

            let mut secondary = Vec::new();
            if out_of_depth {
                secondary.push(self_ptr);
            }
            secondary.extend_from_slice(&super_vt.secondary_types);
            for interface in &class.interfaces {
                let ivt = interface.vt().expect("interface resolved without VT");
                secondary.push(ivt.as_ptr());
                secondary.extend_from_slice(&ivt.secondary_types);
            }
            sort_and_dedup(&mut secondary);
            vt.secondary_types = secondary;
        }
    }

    if !class.is_abstract() && !class.is_interface() {
        vt.imt = Some(build_imt(class));
    }
    Ok(vt)
}

/// Builds the VT of a primitive class: only usable for subtype tests.
pub fn build_primitive_vt(class: &ClassRef) -> Box<VirtualTable> {
    let mut vt = blank_vt(class);
    let self_ptr = VtPtr::of(&vt);
    vt.depth = 0;
    vt.display[0] = self_ptr;
    vt.offset = CACHE_INDEX + 1;
    vt
}

/// Builds the VT of an array class, deriving display and secondary types
/// from the component per the array subtyping rules. The super
/// (java/lang/Object) and the two array interfaces must be resolved.
pub fn build_array_vt(
    loader: &Arc<ClassLoader>,
    class: &ClassRef,
) -> Result<Box<VirtualTable>, JavaError> {
    let component = class
        .as_array()
        .expect("array vt on a non-array")
        .component
        .clone();
    let object = class
        .super_class
        .clone()
        .expect("array class without a super");
    let object_vt = object.vt().expect("array built before java/lang/Object");

    let mut vt = blank_vt(class);
    // Arrays dispatch java/lang/Object methods.
    vt.methods = object_vt.methods.clone();
    vt.finalize_method = object_vt.finalize_method;
    if !component.is_primitive() {
        vt.base_class_vt = component.vt().expect("component without VT").as_ptr();
    }
    let self_ptr = VtPtr::of(&vt);

    // Find the deepest non-array base and the dimension of this class.
    let mut base = component.clone();
    let mut dim = 1usize;
    loop {
        let next = match base.as_array() {
            Some(ac) => ac.component.clone(),
            None => break,
        };
        base = next;
        dim += 1;
    }

    if component.is_primitive() {
        // int[] and friends sit right below Object and share
        // java/lang/Object[]'s secondary types (Cloneable, Serializable).
        vt.depth = 1;
        vt.display[0] = object_vt.as_ptr();
        vt.display[1] = self_ptr;
        vt.offset = CACHE_INDEX + 2;
        let mut secondary: Vec<VtPtr> = class
            .interfaces
            .iter()
            .map(|i| i.vt().expect("array interface without VT").as_ptr())
            .collect();
        sort_and_dedup(&mut secondary);
        vt.secondary_types = secondary;
        return Ok(vt);
    }

    if Arc::ptr_eq(&base, &object) && dim == 1 {
        // java/lang/Object[] starts each dimension hierarchy.
        vt.depth = 1;
        vt.display[0] = object_vt.as_ptr();
        vt.display[1] = self_ptr;
        vt.offset = CACHE_INDEX + 2;
        let mut secondary: Vec<VtPtr> = class
            .interfaces
            .iter()
            .map(|i| i.vt().expect("array interface without VT").as_ptr())
            .collect();
        sort_and_dedup(&mut secondary);
        vt.secondary_types = secondary;
        return Ok(vt);
    }

    let names = loader.names();
    let intf = base.is_interface();

    // Determine the super array and whether this class opens a fresh
    // secondary list.
    let (super_array, fresh_list, lift_dim) = if base.is_primitive() {
        // The super of int[][] is Object[].
        let super_name = names.array_name(dim - 1, &object.name);
        (loader.construct_array(&super_name)?, false, dim - 1)
    } else if Arc::ptr_eq(&base, &object) {
        // The super of Object[][] is Object[]; it opens the list for its
        // dimension.
        (component.clone(), true, dim - 1)
    } else {
        let base_super = base
            .super_class
            .clone()
            .expect("interface or class without a super in array lifting")
            ;
        let super_name = names.array_name(dim, &base_super.name);
        (loader.construct_array(&super_name)?, false, dim)
    };

    let super_vt = super_array.vt().expect("super array without VT");
    vt.depth = super_vt.depth + 1;
    let copy = vt.depth.min(DISPLAY_LENGTH);
    vt.display[..copy].copy_from_slice(&super_vt.display[..copy]);

    let mut add_super = false;
    if vt.depth < DISPLAY_LENGTH && !intf {
        vt.display[vt.depth] = self_ptr;
        vt.offset = CACHE_INDEX + vt.depth + 1;
    } else {
        vt.offset = CACHE_INDEX;
        // The super joins the list when this is an interface array or the
        // super itself fell out of the display.
        if intf || vt.depth != DISPLAY_LENGTH {
            add_super = true;
        }
    }

    let mut secondary = Vec::new();
    if fresh_list {
        // Object[]^n opens the list for its dimension: the super-array
        // list plus Cloneable and Serializable lifted to it.
        if vt.offset == CACHE_INDEX {
            secondary.push(self_ptr);
        }
        secondary.extend_from_slice(&super_vt.secondary_types);
        for interface in &class.interfaces {
            let lifted = loader.construct_array(&names.array_name(lift_dim, &interface.name))?;
            secondary.push(lifted.vt().expect("lifted interface without VT").as_ptr());
        }
    } else if !base.interfaces.is_empty() || add_super {
        if add_super {
            secondary.push(super_vt.as_ptr());
        }
        secondary.extend_from_slice(&super_vt.secondary_types);
        for interface in &base.interfaces {
            let lifted = loader.construct_array(&names.array_name(lift_dim, &interface.name))?;
            secondary.push(lifted.vt().expect("lifted interface without VT").as_ptr());
        }
    } else if base.is_primitive() {
        // int[][] shares Object[][]'s list.
        let peer_name = names.array_name(lift_dim + 1, &object.name);
        let peer = loader.construct_array(&peer_name)?;
        secondary.extend_from_slice(&peer.vt().expect("peer without VT").secondary_types);
    } else {
        secondary.extend_from_slice(&super_vt.secondary_types);
    }
    sort_and_dedup(&mut secondary);
    vt.secondary_types = secondary;
    Ok(vt)
}
