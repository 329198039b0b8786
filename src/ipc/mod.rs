/*!
 * IPC Module
 * Inter-process shared memory
 */

pub mod shm;
